//! Hardware-abstraction layer between rendering code and a Vulkan-class
//! graphics API.
//!
//! `kiln` covers the mechanism by which named shader resources get bound,
//! pipelines get (re)built, and binding-set memory gets allocated and
//! reclaimed safely:
//!
//! - The [`shader`] module reflects compiled SPIR-V binaries into typed
//!   binding layouts, without executing or recompiling any shader code.
//! - The [`pipeline`] module composes the reflected bindings of all stages
//!   into a [`PipelineLayout`](pipeline::PipelineLayout) and drives the lazy
//!   (re)creation of native pipeline objects. Resources are assigned by name
//!   through typed bind points; pending descriptor writes are staged in a
//!   queue and flushed right before each bind.
//! - The [`descriptor_set`] module provides a thread-safe, reference-counted
//!   pool of binding sets. A pool instance is destroyed only once the last
//!   set allocated from it has been released.
//! - The [`render_pass`] module validates framebuffer attachments against the
//!   attachment layout a pipeline declares, and recreates the native
//!   framebuffer object only when an attachment actually changes.
//!
//! The low-level API itself is reached exclusively through the narrow
//! [`Backend`](backend::Backend) trait; the [`Headless`](backend::Headless)
//! implementation runs the entire layer without a driver, which is how the
//! crate tests itself.
//!
//! Native objects superseded while a pipeline or framebuffer is live are
//! never destroyed inline. They are retired to a deferred-deletion queue
//! ordered by submission generation (see [`deferred`]), which the caller
//! drains once per frame after the device reports a generation complete.

pub mod backend;
pub mod command_buffer;
pub mod deferred;
pub mod descriptor_set;
pub mod device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;

pub use crate::{
    backend::{Backend, BackendError},
    device::Device,
};
