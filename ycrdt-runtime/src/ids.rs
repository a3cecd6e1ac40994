/// Unsigned 64-bit identifier for one document replica. Wrapped
/// in a newtype rather than a bare `u64` so a clock value can't be passed
/// where a client id is expected at a call site — distinct replicas must
/// hold distinct ids or updates silently diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl From<u64> for ClientId {
    fn from(value: u64) -> Self {
        ClientId(value)
    }
}

impl From<ClientId> for u64 {
    fn from(value: ClientId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `(client, clock)` pair uniquely identifying one CRDT operation. `clock`
/// is monotonically increasing per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId {
    pub client: ClientId,
    pub clock: u32,
}

impl OpId {
    pub fn new(client: ClientId, clock: u32) -> Self {
        OpId { client, clock }
    }
}

impl From<yrs::block::ID> for OpId {
    fn from(id: yrs::block::ID) -> Self {
        OpId { client: ClientId(id.client), clock: id.clock }
    }
}
