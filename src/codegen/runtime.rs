//! Array runtime shipped next to generated C code
//!
//! Generated C and wrapper sources include `ndarrays.h`. The header is
//! self-contained (all functions are `static inline`) so a compiled module
//! only needs this one extra file.

/// File name generated sources include
pub const NDARRAYS_HEADER: &str = "ndarrays.h";

/// Contents of `ndarrays.h`
pub const NDARRAYS_SOURCE: &str = r#"#ifndef NDARRAYS_H
#define NDARRAYS_H

#include <stdarg.h>
#include <stdbool.h>
#include <stdint.h>
#include <stdlib.h>
#include <string.h>
#include <complex.h>

enum e_types
{
    nd_bool,
    nd_int8,
    nd_int16,
    nd_int32,
    nd_int64,
    nd_float,
    nd_double,
    nd_cfloat,
    nd_cdouble
};

enum e_order
{
    order_c,
    order_f
};

/* A step of zero selects the single element at start and drops the axis */
typedef struct s_slice
{
    int64_t start;
    int64_t end;
    int64_t step;
} t_slice;

typedef struct s_ndarray
{
    union
    {
        void *raw_data;
        bool *nd_bool;
        int8_t *nd_int8;
        int16_t *nd_int16;
        int32_t *nd_int32;
        int64_t *nd_int64;
        float *nd_float;
        double *nd_double;
        float complex *nd_cfloat;
        double complex *nd_cdouble;
    };
    int32_t nd;
    int64_t *shape;
    /* in elements, not bytes */
    int64_t *strides;
    int64_t length;
    int32_t type_size;
    enum e_types type;
    enum e_order order;
    bool is_view;
} t_ndarray;

static const int32_t nd_type_size[] = {
    sizeof(bool), sizeof(int8_t), sizeof(int16_t), sizeof(int32_t), sizeof(int64_t),
    sizeof(float), sizeof(double), sizeof(float complex), sizeof(double complex)
};

static inline void ndarray_set_strides(t_ndarray *arr)
{
    int64_t stride = 1;
    if (arr->order == order_c)
    {
        for (int32_t k = arr->nd - 1; k >= 0; --k)
        {
            arr->strides[k] = stride;
            stride *= arr->shape[k];
        }
    }
    else
    {
        for (int32_t k = 0; k < arr->nd; ++k)
        {
            arr->strides[k] = stride;
            stride *= arr->shape[k];
        }
    }
    arr->length = stride;
}

static inline t_ndarray array_create(int32_t nd, const int64_t *shape, enum e_types type, bool is_view, enum e_order order)
{
    t_ndarray arr;
    arr.nd = nd;
    arr.type = type;
    arr.type_size = nd_type_size[type];
    arr.order = order;
    arr.is_view = is_view;
    arr.shape = malloc(nd * sizeof(int64_t));
    arr.strides = malloc(nd * sizeof(int64_t));
    memcpy(arr.shape, shape, nd * sizeof(int64_t));
    ndarray_set_strides(&arr);
    arr.raw_data = is_view ? NULL : calloc(arr.length > 0 ? arr.length : 1, arr.type_size);
    return arr;
}

/* Array over caller-provided storage */
static inline t_ndarray stack_array_init(int32_t nd, const int64_t *shape, enum e_types type, enum e_order order, void *buffer)
{
    t_ndarray arr = array_create(nd, shape, type, true, order);
    arr.raw_data = buffer;
    return arr;
}

static inline void free_array(t_ndarray *arr)
{
    if (arr->shape == NULL)
        return;
    if (!arr->is_view)
        free(arr->raw_data);
    free(arr->shape);
    free(arr->strides);
    arr->raw_data = NULL;
    arr->shape = NULL;
    arr->strides = NULL;
}

/* Release the description of a view, leaving the viewed data alone */
static inline void free_pointer(t_ndarray *arr)
{
    if (arr->shape == NULL)
        return;
    free(arr->shape);
    free(arr->strides);
    arr->shape = NULL;
    arr->strides = NULL;
}

static inline t_slice new_slice(int64_t start, int64_t end, int64_t step)
{
    t_slice s = {start, end, step};
    return s;
}

/* n is the rank of the result; one slice is given per axis of arr */
static inline t_ndarray array_slicing(t_ndarray arr, int32_t n, ...)
{
    t_ndarray view = arr;
    int64_t offset = 0;
    int32_t k = 0;
    va_list slices;
    view.nd = n;
    view.is_view = true;
    view.shape = malloc((n > 0 ? n : 1) * sizeof(int64_t));
    view.strides = malloc((n > 0 ? n : 1) * sizeof(int64_t));
    view.length = 1;
    va_start(slices, n);
    for (int32_t axis = 0; axis < arr.nd; ++axis)
    {
        t_slice s = va_arg(slices, t_slice);
        offset += s.start * arr.strides[axis];
        if (s.step == 0)
            continue;
        int64_t length = (s.end - s.start + s.step + (s.step > 0 ? -1 : 1)) / s.step;
        view.shape[k] = length > 0 ? length : 0;
        view.strides[k] = s.step * arr.strides[axis];
        view.length *= view.shape[k];
        ++k;
    }
    va_end(slices);
    view.raw_data = (char *)arr.raw_data + offset * arr.type_size;
    return view;
}

static inline void alias_assign(t_ndarray *dest, t_ndarray src)
{
    *dest = src;
    dest->is_view = true;
    dest->shape = malloc(src.nd * sizeof(int64_t));
    dest->strides = malloc(src.nd * sizeof(int64_t));
    memcpy(dest->shape, src.shape, src.nd * sizeof(int64_t));
    memcpy(dest->strides, src.strides, src.nd * sizeof(int64_t));
}

static inline int64_t get_index(t_ndarray arr, ...)
{
    int64_t offset = 0;
    va_list indices;
    va_start(indices, arr);
    for (int32_t k = 0; k < arr.nd; ++k)
        offset += (int64_t)va_arg(indices, int64_t) * arr.strides[k];
    va_end(indices);
    return offset;
}

#define GET_ELEMENT(arr, type, ...) (arr).type[get_index((arr), __VA_ARGS__)]

#endif /* NDARRAYS_H */
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_defines_every_field_used_by_printers() {
        for field in [
            "nd_bool", "nd_int8", "nd_int16", "nd_int32", "nd_int64", "nd_float", "nd_double", "nd_cfloat", "nd_cdouble",
        ] {
            assert!(NDARRAYS_SOURCE.contains(&format!("*{};", field)), "missing {}", field);
        }
        for function in ["array_create", "stack_array_init", "free_array", "free_pointer", "array_slicing", "alias_assign"] {
            assert!(NDARRAYS_SOURCE.contains(&format!("{}(", function)), "missing {}", function);
        }
    }
}
