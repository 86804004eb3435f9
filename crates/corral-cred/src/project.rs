//! Per-node projection of a credential's allocation.
//!
//! A credential describes the whole job: one global core bitmap indexed
//! by walking the run-length shape arrays, and run-length memory and GRES
//! arrays over the job's hostlist. A compute node cares about exactly one
//! slice of that. The functions here localize the global description to a
//! single named node, copying everything they return so callers can drop
//! the credential's read lock immediately after.

use corral_core::bitmap::Bitmap;
use corral_core::gres::{self, Gres};
use corral_core::hostlist::Hostlist;
use corral_core::runlen;

use crate::args::JobCredArgs;
use crate::error::CredError;

/// One node's share of the allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAlloc {
    /// Job cores in range-list form, e.g. `0-3`.
    pub job_cores: String,
    /// Step cores in range-list form.
    pub step_cores: String,
    /// Job memory limit for this node (MiB).
    pub job_mem_limit: u64,
    /// Step memory limit for this node; inherits the job limit when the
    /// step carries none.
    pub step_mem_limit: u64,
}

/// Half-open slice of the global bitmap belonging to one node.
///
/// Walks the shape arrays with the node's 1-origin position, advancing
/// past whole runs and landing inside the run that covers the node.
fn node_bit_slice(arg: &JobCredArgs, host_index: usize) -> Result<(u32, u32), CredError> {
    let mut remaining = host_index as u32 + 1;
    let mut first_bit: u32 = 0;

    for k in 0.. {
        let (Some(&sockets), Some(&cores), Some(&reps)) = (
            arg.sockets_per_node.get(k),
            arg.cores_per_socket.get(k),
            arg.sock_core_rep_count.get(k),
        ) else {
            return Err(CredError::MissingField("socket/core shape for node"));
        };
        let node_bits = u32::from(sockets) * u32::from(cores);
        if remaining > reps {
            first_bit += node_bits * reps;
            remaining -= reps;
        } else {
            first_bit += node_bits * (remaining - 1);
            return Ok((first_bit, first_bit + node_bits));
        }
    }
    unreachable!("loop either returns or errors")
}

/// Resolves `node_name` to its index in `hostlist`, bounded by
/// `job_nhosts`.
fn host_index(arg: &JobCredArgs, node_name: &str) -> Result<usize, CredError> {
    let hset = Hostlist::parse(&arg.job_hostlist)?;
    let index = hset.find(node_name);
    match index {
        Some(i) if i < arg.job_nhosts as usize => Ok(i),
        _ => {
            tracing::error!(
                node = node_name,
                hostlist = %arg.job_hostlist,
                job_id = arg.step_id.job_id,
                "node not in credential hostlist"
            );
            Err(CredError::UnknownNode {
                node: node_name.to_string(),
            })
        }
    }
}

/// Core range strings and memory limits for one node.
///
/// The job and step bitmaps are sliced to the node's bit range, copied
/// into fresh bitmaps, and formatted as comma-separated range lists
/// without brackets.
///
/// # Errors
///
/// - [`CredError::Hostlist`] when the credential's hostlist is malformed
/// - [`CredError::UnknownNode`] for a node outside the hostlist
/// - [`CredError::MissingField`] when the shape arrays or bitmaps are
///   absent or do not cover the node
pub fn format_core_allocs(
    arg: &JobCredArgs,
    node_name: &str,
    cpus: u16,
) -> Result<NodeAlloc, CredError> {
    let host = host_index(arg, node_name)?;
    let (first_bit, last_bit) = node_bit_slice(arg, host)?;

    let job_bitmap = arg
        .job_core_bitmap
        .as_ref()
        .ok_or(CredError::MissingField("job core bitmap"))?;
    let step_bitmap = arg
        .step_core_bitmap
        .as_ref()
        .ok_or(CredError::MissingField("step core bitmap"))?;

    let width = last_bit - first_bit;
    let mut job_local = Bitmap::new(width);
    let mut step_local = Bitmap::new(width);
    for (local, global) in (first_bit..last_bit).enumerate() {
        if job_bitmap.test(global) {
            job_local.set(local as u32)?;
        }
        if step_bitmap.test(global) {
            step_local.set(local as u32)?;
        }
    }

    if width == 0 {
        tracing::error!(step = %arg.step_id, "step credential has no CPUs selected");
    } else {
        let scale = u32::from(cpus) / width;
        if scale > 1 {
            tracing::debug!(cpus, width, scale, "scaling CPU count");
        }
    }

    let (job_mem_limit, step_mem_limit) = cred_get_mem(arg, node_name);

    Ok(NodeAlloc {
        job_cores: job_local.fmt_ranges(),
        step_cores: step_local.fmt_ranges(),
        job_mem_limit,
        step_mem_limit,
    })
}

/// Job and step memory limits for one node.
///
/// Batch steps always read the first job run-length record. A step limit
/// of zero, or absent step arrays, inherits the job limit. Resolution
/// failures log and leave the affected limit at zero rather than failing
/// the launch path.
#[must_use]
pub fn cred_get_mem(arg: &JobCredArgs, node_name: &str) -> (u64, u64) {
    let job_rep_idx = if arg.step_id.is_batch() {
        // Batch steps only have the job hostlist set and land on node 0.
        Some(0)
    } else {
        match Hostlist::parse(&arg.job_hostlist)
            .ok()
            .and_then(|h| h.find(node_name))
        {
            Some(node_id) => runlen::rep_index(&arg.job_mem_alloc_rep_count, node_id as u32),
            None => {
                tracing::error!(
                    node = node_name,
                    hostlist = %arg.job_hostlist,
                    "node not in job hostlist"
                );
                None
            }
        }
    };

    let job_mem = match job_rep_idx.and_then(|i| arg.job_mem_alloc.get(i)) {
        Some(&mem) => mem,
        None => {
            tracing::error!(
                node = node_name,
                "node not covered by job memory records, limit not set"
            );
            0
        }
    };

    let mut step_mem = 0;
    if !arg.step_mem_alloc.is_empty() {
        let step_rep_idx = match Hostlist::parse(&arg.step_hostlist)
            .ok()
            .and_then(|h| h.find(node_name))
        {
            Some(node_id) => runlen::rep_index(&arg.step_mem_alloc_rep_count, node_id as u32),
            None => {
                tracing::error!(
                    node = node_name,
                    hostlist = %arg.step_hostlist,
                    "node not in step hostlist"
                );
                None
            }
        };
        match step_rep_idx.and_then(|i| arg.step_mem_alloc.get(i)) {
            Some(&mem) => step_mem = mem,
            None => {
                tracing::error!(node = node_name, "node not covered by step memory records");
            }
        }
    }

    // Unset or explicit zero inherits the job limit.
    if step_mem == 0 {
        step_mem = job_mem;
    }

    tracing::debug!(
        step = %arg.step_id,
        job_mem_limit = job_mem,
        step_mem_limit = step_mem,
        "memory extracted from credential"
    );
    (job_mem, step_mem)
}

/// Job and step GRES lists for one node. `None` lists pass through as
/// `None` without error.
///
/// # Errors
///
/// - [`CredError::Hostlist`] when the credential's hostlist is malformed
/// - [`CredError::UnknownNode`] for a node outside the hostlist
#[allow(clippy::type_complexity)]
pub fn cred_gres(
    arg: &JobCredArgs,
    node_name: &str,
) -> Result<(Option<Vec<Gres>>, Option<Vec<Gres>>), CredError> {
    if arg.job_gres_list.is_none() && arg.step_gres_list.is_none() {
        return Ok((None, None));
    }

    let host = host_index(arg, node_name)?;
    Ok((
        gres::extract(arg.job_gres_list.as_deref(), host),
        gres::extract(arg.step_gres_list.as_deref(), host),
    ))
}
