use slotmap::new_key_type;

new_key_type! {
    /// Identifies a junction or endpoint node in a flow graph.
    pub struct NodeId;

    /// Identifies a link (directed flow edge) in a flow graph.
    pub struct LinkId;
}
