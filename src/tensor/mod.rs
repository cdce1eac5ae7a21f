/// Memory layout and element kind of activation tensors.
mod format;
/// Owned 8-bit activation tensor.
mod tensor_u8;
/// Borrowed source/destination views passed to the forward pass.
mod view;

pub use format::{ElemKind, TensorFormat};
pub use tensor_u8::TensorU8;
pub use view::{Dst, Src};
