//! The instruction codec: opcode space, operand representation, and the
//! encoder/decoder pair that convert between them and the wire format.

pub mod decoder;
pub mod descriptor;
pub mod encoder;
pub mod opcode;
pub mod operand;
pub mod stream;

pub use decoder::{decode, DecodeError, DecodedInstruction};
pub use encoder::{encode, EncodeError, Instruction, RelocationSite, RelocationTarget};
pub use operand::{CompactForm, ComplexData, ComplexOffset, ComplexTerm, Operand};
