//! fieldcast-services — splitting, reassembly, model resolution and the
//! send/receive pipeline built on fieldcast-core.

pub mod model;
pub mod part;
pub mod pipeline;
pub mod reassembly;
pub mod transmission;
pub mod transport;

pub use model::{CatalogError, ModelCatalog, ModelProvider, Resolved, UnknownModel};
pub use part::Part;
pub use pipeline::{DecodeError, Inbox, Outbox, PreparedTransmission, SendError};
pub use reassembly::{
    CompletedPayload, Delivery, Reassembler, ReceiveError, StalledTransmission, TransmissionStatus,
};
pub use transmission::{
    part_count, split, split_with_limit, Integrity, SplitError, Transmission, TransmissionIds,
    TransmissionKey, TransmissionState,
};
pub use transport::{receive_loop, ChannelSink, MemoryTransport, PartSink, TransportError};
