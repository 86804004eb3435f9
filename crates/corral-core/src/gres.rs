//! Generic resource (GRES) allocation model.
//!
//! A job's GRES list describes, per resource kind, how many units each
//! node of the job received. Credentials carry the whole list; the
//! compute node extracts its own slice.

/// One generic resource kind within a job or step allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gres {
    /// Resource name, e.g. `gpu`.
    pub name: String,
    /// Optional subtype, e.g. `a100`.
    pub type_name: Option<String>,
    /// Units allocated on the i-th node of the allocation's hostlist.
    pub node_count: Vec<u64>,
}

impl Gres {
    /// Creates an untyped resource.
    #[must_use]
    pub fn new(name: impl Into<String>, node_count: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            node_count,
        }
    }
}

/// Projects a GRES list onto one node of the allocation.
///
/// Each output entry keeps its name and type but carries a single-element
/// `node_count` holding that node's share. `None` in yields `None` out;
/// entries not covering `node_index` are skipped.
#[must_use]
pub fn extract(list: Option<&[Gres]>, node_index: usize) -> Option<Vec<Gres>> {
    let list = list?;
    Some(
        list.iter()
            .filter_map(|g| {
                g.node_count.get(node_index).map(|&count| Gres {
                    name: g.name.clone(),
                    type_name: g.type_name.clone(),
                    node_count: vec![count],
                })
            })
            .collect(),
    )
}
