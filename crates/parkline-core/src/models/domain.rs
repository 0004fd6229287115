//! Enforcement payloads submitted through the sync engine

use serde::{Deserialize, Serialize};

use super::RecordKind;

/// A typed domain write that maps onto exactly one record kind
pub trait DomainWrite: Serialize {
    /// Queue bucket and remote operation for this write
    const KIND: RecordKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Truck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Active,
    Suspended,
    Blocked,
}

/// Vehicle registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleData {
    pub plate: String,
    pub vehicle_type: VehicleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VehicleStatus>,
}

impl DomainWrite for VehicleData {
    const KIND: RecordKind = RecordKind::Vehicle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    QrCode,
    CreditCard,
}

/// Parking ticket issuance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketData {
    pub plate: String,
    pub zone_id: u32,
    /// Paid duration in minutes
    pub duration: u32,
    pub payment_method: PaymentMethod,
    pub amount: f64,
}

impl DomainWrite for TicketData {
    const KIND: RecordKind = RecordKind::Ticket;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfractionType {
    NoPayment,
    ExpiredTicket,
    ForbiddenZone,
    UnregisteredVehicle,
}

/// Infraction filed by a field agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfractionData {
    pub plate: String,
    pub agent_id: u32,
    pub zone_id: u32,
    pub infraction_type: InfractionType,
    /// RFC 3339 timestamp of when the infraction was observed
    pub start_datetime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo_urls: Vec<String>,
}

impl DomainWrite for InfractionData {
    const KIND: RecordKind = RecordKind::Infraction;
}
