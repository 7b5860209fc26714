//! CUDA source prepended to every operator module.
//!
//! Mirrors `varbatch_core::meta::ImageDesc` and the element conversions in
//! `varbatch_core::pixel`. Modules are compiled with IEEE division and
//! square root and without FMA contraction, so each expression rounds the
//! same way as its host counterpart.

pub(crate) const COMMON_CUDA_SRC: &str = r#"
#ifndef COEFF_SMEM_BYTES
#define COEFF_SMEM_BYTES 4096
#endif

typedef unsigned char u8;
typedef unsigned short u16;
typedef short s16;
typedef int s32;
typedef float f32;

struct ImageDesc {
    unsigned long long base;
    long long row_stride;
    long long plane_stride;
    int width;
    int height;
};

// Packed: channels interleaved inside the row. Planar: plane c starts
// c * plane_stride bytes after plane 0.
template <typename T>
__device__ __forceinline__ T* pixel_ptr(const ImageDesc& d, int x, int y, int c,
                                        int channels, int planar)
{
    char* row = (char*)d.base + (long long)y * d.row_stride;
    if (planar) {
        return (T*)(row + (long long)c * d.plane_stride) + x;
    }
    return (T*)row + (long long)x * channels + c;
}

template <typename T>
__device__ __forceinline__ float load_f(const ImageDesc& d, int x, int y, int c,
                                        int channels, int planar)
{
    return (float)*pixel_ptr<T>(d, x, y, c, channels, planar);
}

__device__ __forceinline__ float clamp_or_zero(float v, float lo, float hi)
{
    if (v != v) return 0.0f;
    return fminf(fmaxf(v, lo), hi);
}

__device__ __forceinline__ int clamp_i32(double v)
{
    if (v != v) return 0;
    if (v >= 2147483647.0) return 2147483647;
    if (v <= -2147483648.0) return (int)(-2147483647 - 1);
    return (int)v;
}

// round: nearest-even then clamp. trunc: toward zero then clamp.
// from_hash: 32 random bits onto the full range ([0, 1) for floats).
template <typename T> struct Sat;

template <> struct Sat<u8> {
    static __device__ __forceinline__ u8 round(float v) { return (u8)clamp_or_zero(rintf(v), 0.0f, 255.0f); }
    static __device__ __forceinline__ u8 trunc(float v) { return (u8)clamp_or_zero(truncf(v), 0.0f, 255.0f); }
    static __device__ __forceinline__ u8 from_hash(unsigned int h) { return (u8)(h % 256u); }
};

template <> struct Sat<u16> {
    static __device__ __forceinline__ u16 round(float v) { return (u16)clamp_or_zero(rintf(v), 0.0f, 65535.0f); }
    static __device__ __forceinline__ u16 trunc(float v) { return (u16)clamp_or_zero(truncf(v), 0.0f, 65535.0f); }
    static __device__ __forceinline__ u16 from_hash(unsigned int h) { return (u16)(h % 65536u); }
};

template <> struct Sat<s16> {
    static __device__ __forceinline__ s16 round(float v) { return (s16)clamp_or_zero(rintf(v), -32768.0f, 32767.0f); }
    static __device__ __forceinline__ s16 trunc(float v) { return (s16)clamp_or_zero(truncf(v), -32768.0f, 32767.0f); }
    static __device__ __forceinline__ s16 from_hash(unsigned int h) { return (s16)((int)(h % 65536u) - 32768); }
};

template <> struct Sat<s32> {
    static __device__ __forceinline__ s32 round(float v) { return clamp_i32(rint((double)v)); }
    static __device__ __forceinline__ s32 trunc(float v) { return clamp_i32(trunc((double)v)); }
    static __device__ __forceinline__ s32 from_hash(unsigned int h) { return (s32)h; }
};

template <> struct Sat<f32> {
    static __device__ __forceinline__ f32 round(float v) { return v; }
    static __device__ __forceinline__ f32 trunc(float v) { return v; }
    static __device__ __forceinline__ f32 from_hash(unsigned int h) { return (float)(h >> 8) * (1.0f / 16777216.0f); }
};

__device__ __forceinline__ unsigned int rotl32(unsigned int v, int r)
{
    return (v << r) | (v >> (32 - r));
}

// Stateless per-element hash: same inputs, same value, on any launch shape.
__device__ __forceinline__ unsigned int erase_hash(unsigned int seed, unsigned int region,
                                                   unsigned int x, unsigned int y, unsigned int c)
{
    unsigned int h = seed ^ (region * 0x9E3779B9u);
    h ^= x * 0x85EBCA6Bu;
    h = rotl32(h, 13);
    h ^= y * 0xC2B2AE35u;
    h = rotl32(h, 17);
    h ^= c * 0x27D4EB2Fu;
    h ^= h >> 16;
    h *= 0x85EBCA6Bu;
    h ^= h >> 13;
    h *= 0xC2B2AE35u;
    h ^= h >> 16;
    return h;
}

// Keys cubic convolution, A = -0.75.
__device__ __forceinline__ void cubic_weights(float x, float w[4])
{
    const float A = -0.75f;
    w[0] = ((A * (x + 1.0f) - 5.0f * A) * (x + 1.0f) + 8.0f * A) * (x + 1.0f) - 4.0f * A;
    w[1] = ((A + 2.0f) * x - (A + 3.0f)) * x * x + 1.0f;
    w[2] = ((A + 2.0f) * (1.0f - x) - (A + 3.0f)) * (1.0f - x) * (1.0f - x) + 1.0f;
    w[3] = 1.0f - w[0] - w[1] - w[2];
}

// 4x4 neighbourhood around (sx, sy) with edge-replicated reads.
template <typename T>
__device__ float cubic_sample(const ImageDesc& d, int sx, int sy, float fx, float fy,
                              int c, int channels, int planar)
{
    float wx[4], wy[4];
    cubic_weights(fx, wx);
    cubic_weights(fy, wy);
    float acc = 0.0f;
    for (int j = 0; j < 4; ++j) {
        const int yy = min(max(sy - 1 + j, 0), d.height - 1);
        float row = 0.0f;
        for (int i = 0; i < 4; ++i) {
            const int xx = min(max(sx - 1 + i, 0), d.width - 1);
            row += wx[i] * load_f<T>(d, xx, yy, c, channels, planar);
        }
        acc += wy[j] * row;
    }
    return acc;
}
"#;
