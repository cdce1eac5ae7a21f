use std::fmt;

use super::TensorFormat;

/// A 4D unsigned 8-bit tensor holding quantized activations.
///
/// Element order follows `format`; `get`/`set` take logical `(n, c, h, w)` coordinates
/// regardless of layout.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorU8 {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
    pub format: TensorFormat,
    pub data: Vec<u8>,
}

impl TensorU8 {
    pub fn new(n: usize, c: usize, h: usize, w: usize, format: TensorFormat) -> Self {
        TensorU8 {
            n,
            c,
            h,
            w,
            format,
            data: vec![0u8; n * c * h * w],
        }
    }

    fn index(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        n * self.c * self.h * self.w + self.format.offset(self.c, self.h, self.w, c, h, w)
    }

    pub fn get(&self, n: usize, c: usize, h: usize, w: usize) -> u8 {
        self.data[self.index(n, c, h, w)]
    }

    pub fn set(&mut self, n: usize, c: usize, h: usize, w: usize, val: u8) {
        let idx = self.index(n, c, h, w);
        self.data[idx] = val;
    }

    pub fn fill(&mut self, val: u8) {
        self.data.fill(val);
    }

    /// Copy into the other layout, preserving logical coordinates.
    pub fn to_format(&self, format: TensorFormat) -> TensorU8 {
        if format == self.format {
            return self.clone();
        }
        let mut out = TensorU8::new(self.n, self.c, self.h, self.w, format);
        for n in 0..self.n {
            for c in 0..self.c {
                for h in 0..self.h {
                    for w in 0..self.w {
                        out.set(n, c, h, w, self.get(n, c, h, w));
                    }
                }
            }
        }
        out
    }

    pub fn memory_bytes(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for TensorU8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}x{} (u8, {})", self.n, self.c, self.h, self.w, self.format)
    }
}
