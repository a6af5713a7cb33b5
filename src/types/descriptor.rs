#[derive(Clone, Debug, serde::Serialize)]
pub struct PrimitiveDescriptor {
    pub type_name: String,
    pub description: String,
    /// Self-driven primitives (timers) receive no inbound signals.
    pub self_driven: bool,
}
