//! JSON-RPC 2.0 tool-call surface mirroring the job-submission API.

pub mod rpc;
pub mod tooling;
