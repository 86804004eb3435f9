//! Credential argument bundles.
//!
//! [`JobCredArgs`] is the authorization payload a job credential binds:
//! who runs, which step, which nodes, and which slice of each node's
//! hardware. [`SbcastCredArgs`] is the (much smaller) broadcast
//! equivalent. The bundles are plain owned data; a credential takes
//! ownership at create and keeps it for life.

use corral_core::bitmap::Bitmap;
use corral_core::gres::Gres;
use corral_core::identity::Identity;

/// Sentinel uid/gid for an unresolved principal; rejected by every
/// create and extract path.
pub const AUTH_NOBODY: u32 = 0xffff_fffd;

/// Step-id sentinel marking a batch script step.
pub const BATCH_SCRIPT: u32 = 0xffff_fffa;

/// Identifies one step of one (possibly heterogeneous) job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId {
    /// Job id.
    pub job_id: u32,
    /// Enclosing heterogeneous job id, or 0.
    pub het_job_id: u32,
    /// Step number, or [`BATCH_SCRIPT`].
    pub step_id: u32,
}

impl StepId {
    /// Creates a plain (non-het) step id.
    #[must_use]
    pub const fn new(job_id: u32, step_id: u32) -> Self {
        Self {
            job_id,
            het_job_id: 0,
            step_id,
        }
    }

    /// Returns `true` for a batch script step.
    #[must_use]
    pub const fn is_batch(&self) -> bool {
        self.step_id == BATCH_SCRIPT
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_batch() {
            write!(f, "{}.batch", self.job_id)
        } else {
            write!(f, "{}.{}", self.job_id, self.step_id)
        }
    }
}

/// One node's resolved network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    /// Node name.
    pub name: String,
    /// Host address (numeric or resolvable).
    pub host: String,
    /// Daemon port.
    pub port: u16,
}

/// The authorization payload of a job credential.
///
/// The run-length shape arrays (`sockets_per_node`, `cores_per_socket`,
/// `sock_core_rep_count`) describe the distinct per-node hardware shapes;
/// the core bitmaps are indexed by the global bit space those arrays
/// project. `core_array_size` is computed at create, never caller
/// supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCredArgs {
    /// Enriched identity; populated at create when enrichment is on.
    pub id: Option<Identity>,
    /// User id the step runs as.
    pub uid: u32,
    /// Group id the step runs as.
    pub gid: u32,
    /// Step identifier.
    pub step_id: StepId,

    /// Host-range expression for the whole job.
    pub job_hostlist: String,
    /// Host-range expression for this step.
    pub step_hostlist: String,
    /// Number of nodes in the job.
    pub job_nhosts: u32,
    /// Sockets per node, one entry per distinct shape.
    pub sockets_per_node: Vec<u16>,
    /// Cores per socket, parallel to `sockets_per_node`.
    pub cores_per_socket: Vec<u16>,
    /// Consecutive-node run lengths, parallel to the shape arrays.
    pub sock_core_rep_count: Vec<u32>,
    /// Effective prefix length of the shape arrays; set by create.
    pub core_array_size: u32,

    /// Cores allocated to the job, over the global bit space.
    pub job_core_bitmap: Option<Bitmap>,
    /// Cores allocated to the step, over the same bit space.
    pub step_core_bitmap: Option<Bitmap>,

    /// CPUs per node, run-length encoded values.
    pub cpu_array: Vec<u16>,
    /// Run lengths for `cpu_array`.
    pub cpu_array_reps: Vec<u32>,

    /// Per-node job memory limits (MiB), run-length values.
    pub job_mem_alloc: Vec<u64>,
    /// Run lengths for `job_mem_alloc`.
    pub job_mem_alloc_rep_count: Vec<u32>,
    /// Per-node step memory limits; empty means inherit the job limit.
    pub step_mem_alloc: Vec<u64>,
    /// Run lengths for `step_mem_alloc`.
    pub step_mem_alloc_rep_count: Vec<u32>,

    /// Generic resources allocated to the job.
    pub job_gres_list: Option<Vec<Gres>>,
    /// Generic resources allocated to the step.
    pub step_gres_list: Option<Vec<Gres>>,

    /// Bank account the job charges.
    pub job_account: Option<String>,
    /// Node alias list, if the cluster runs with aliased names.
    pub job_alias_list: Option<String>,
    /// Administrative comment.
    pub job_comment: Option<String>,
    /// Feature constraints the job requested.
    pub job_constraints: Option<String>,
    /// Licenses the job holds.
    pub job_licenses: Option<String>,
    /// Partition the job runs in.
    pub job_partition: Option<String>,
    /// Reservation the job runs under.
    pub job_reservation: Option<String>,
    /// Batch script stderr path.
    pub job_std_err: Option<String>,
    /// Batch script stdin path.
    pub job_std_in: Option<String>,
    /// Batch script stdout path.
    pub job_std_out: Option<String>,
    /// Resolved addresses for the job's nodes.
    pub job_node_addrs: Vec<NodeAddr>,
}

impl JobCredArgs {
    /// Creates a bundle for `step_id` running as `uid`/`gid`, everything
    /// else empty.
    #[must_use]
    pub fn new(uid: u32, gid: u32, step_id: StepId) -> Self {
        Self {
            uid,
            gid,
            step_id,
            ..Self::default()
        }
    }
}

impl Default for JobCredArgs {
    /// An empty bundle owned by NOBODY, mirroring the allocator the
    /// unpack path starts from.
    fn default() -> Self {
        Self {
            id: None,
            uid: AUTH_NOBODY,
            gid: AUTH_NOBODY,
            step_id: StepId::new(0, 0),
            job_hostlist: String::new(),
            step_hostlist: String::new(),
            job_nhosts: 0,
            sockets_per_node: Vec::new(),
            cores_per_socket: Vec::new(),
            sock_core_rep_count: Vec::new(),
            core_array_size: 0,
            job_core_bitmap: None,
            step_core_bitmap: None,
            cpu_array: Vec::new(),
            cpu_array_reps: Vec::new(),
            job_mem_alloc: Vec::new(),
            job_mem_alloc_rep_count: Vec::new(),
            step_mem_alloc: Vec::new(),
            step_mem_alloc_rep_count: Vec::new(),
            job_gres_list: None,
            step_gres_list: None,
            job_account: None,
            job_alias_list: None,
            job_comment: None,
            job_constraints: None,
            job_licenses: None,
            job_partition: None,
            job_reservation: None,
            job_std_err: None,
            job_std_in: None,
            job_std_out: None,
            job_node_addrs: Vec::new(),
        }
    }
}

/// Arguments for creating a broadcast credential, and the payload an
/// extract returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbcastCredArgs {
    /// Job the broadcast targets.
    pub job_id: u32,
    /// Enclosing heterogeneous job id, or 0.
    pub het_job_id: u32,
    /// Step the broadcast targets.
    pub step_id: u32,
    /// Requesting user.
    pub uid: u32,
    /// Requesting group.
    pub gid: u32,
    /// User name, when already resolved.
    pub user_name: Option<String>,
    /// Supplementary group list.
    pub gids: Vec<u32>,
    /// Host-range expression for the target nodes.
    pub nodes: String,
    /// Absolute expiration (unix seconds).
    pub expiration: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_id_display() {
        assert_eq!(StepId::new(42, 3).to_string(), "42.3");
        assert_eq!(StepId::new(42, BATCH_SCRIPT).to_string(), "42.batch");
    }

    #[test]
    fn test_default_args_owned_by_nobody() {
        let args = JobCredArgs::default();
        assert_eq!(args.uid, AUTH_NOBODY);
        assert_eq!(args.gid, AUTH_NOBODY);
    }

    #[test]
    fn test_new_sets_principal() {
        let args = JobCredArgs::new(1000, 1000, StepId::new(7, 0));
        assert_eq!(args.uid, 1000);
        assert_eq!(args.step_id.job_id, 7);
        assert!(args.job_hostlist.is_empty());
    }
}
