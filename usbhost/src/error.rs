use thiserror::Error;

/// Everything that can go wrong inside the engine, grouped by how callers are
/// expected to react.
///
/// Resource errors fail the calling operation immediately and are never
/// retried internally. Transfer errors carry the bounded-retry policy of the
/// dispatcher and the bulk protocol. Configuration errors are produced by
/// class drivers during device configuration; only `DeviceInitIncomplete` is
/// transient.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum UsbError {
    // Resource errors.
    #[error("address pool exhausted")]
    AddressPoolExhausted,

    #[error("address {0} not found in pool")]
    AddressNotFound(u8),

    #[error("device {0} has no endpoint table")]
    NoEndpointTable(u8),

    #[error("endpoint {0} not found in endpoint table")]
    EpNotFound(u8),

    #[error("invalid argument")]
    InvalidArgument,

    #[error("invalid max packet size {0}")]
    InvalidMaxPacketSize(u16),

    // Transfer errors.
    /// The device NAKed `nak_limit` times in a row on one packet exchange.
    #[error("NAK limit reached")]
    NakLimit,

    /// The bus reported a timeout on the retry ceiling's worth of attempts.
    #[error("bus timeout")]
    BusTimeout,

    /// DATA0/DATA1 sequencing mismatch. The endpoint's software toggle has
    /// been resynchronized from hardware by the time this propagates.
    #[error("data toggle mismatch")]
    DataToggle,

    /// The overall transfer deadline expired with the bus still powered.
    #[error("transfer timeout")]
    TransferTimeout,

    /// Bus power disappeared while waiting for completion. Distinct from
    /// `TransferTimeout` so a physical disconnect is never misread as a
    /// protocol failure.
    #[error("VBUS lost during transfer")]
    VbusLost,

    // Configuration errors.
    #[error("device not supported by driver")]
    DeviceNotSupported,

    #[error("driver instance already in use")]
    InstanceInUse,

    #[error("device requires an additional reset")]
    RequiresAdditionalReset,

    #[error("device init incomplete")]
    DeviceInitIncomplete,
}
