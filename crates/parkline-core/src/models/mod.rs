//! Data models for Parkline

mod domain;
mod record;
mod session;

pub use domain::{
    DomainWrite, InfractionData, InfractionType, PaymentMethod, TicketData, VehicleData,
    VehicleStatus, VehicleType,
};
pub use record::{idempotency_key, LocalId, Record, RecordKind, SyncState};
pub use session::{DrainTrigger, SyncFailure, SyncSession};
