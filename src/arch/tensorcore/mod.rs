pub mod bus;
pub mod decoder;
pub mod encoder;
pub mod instruction;
pub mod status;

pub use bus::{Bus, DeviceBus, VolatileBus};
pub use decoder::{DecodedInstruction, DecoderState, DeviceLayout, Executor, MmioDevice, TensorCore};
pub use encoder::{Encoder, GemmRequest, GemmShape, OperandAddrs};
pub use instruction::{InstructionRecord, MetaDescriptor, OperandDescriptor, OperandRole, PackedInstruction};
pub use status::STATUS_RECEIVED;
