use super::ElemKind;

/// Source activations of one forward call, the whole batch contiguous.
#[derive(Debug, Clone, Copy)]
pub enum Src<'a> {
    U8(&'a [u8]),
    F32(&'a [f32]),
}

impl Src<'_> {
    pub fn kind(&self) -> ElemKind {
        match self {
            Src::U8(_) => ElemKind::U8,
            Src::F32(_) => ElemKind::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Src::U8(s) => s.len(),
            Src::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Destination of one forward call, the whole batch contiguous.
#[derive(Debug)]
pub enum Dst<'a> {
    U8(&'a mut [u8]),
    F32(&'a mut [f32]),
}

impl<'a> Dst<'a> {
    pub fn kind(&self) -> ElemKind {
        match self {
            Dst::U8(_) => ElemKind::U8,
            Dst::F32(_) => ElemKind::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Dst::U8(d) => d.len(),
            Dst::F32(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reborrow for a shorter lifetime so the view can be passed down repeatedly.
    pub fn reborrow(&mut self) -> Dst<'_> {
        match self {
            Dst::U8(d) => Dst::U8(d),
            Dst::F32(d) => Dst::F32(d),
        }
    }

    /// Sub-view of elements `[start, start + len)`.
    pub fn slice(self, start: usize, len: usize) -> Dst<'a> {
        match self {
            Dst::U8(d) => Dst::U8(&mut d[start..start + len]),
            Dst::F32(d) => Dst::F32(&mut d[start..start + len]),
        }
    }

    /// Split into consecutive chunks of `chunk` elements (the last may be shorter).
    pub fn chunks(self, chunk: usize) -> Vec<Dst<'a>> {
        match self {
            Dst::U8(d) => d.chunks_mut(chunk).map(Dst::U8).collect(),
            Dst::F32(d) => d.chunks_mut(chunk).map(Dst::F32).collect(),
        }
    }
}
