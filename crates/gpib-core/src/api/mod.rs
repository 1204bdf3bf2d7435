//! Internal API plumbing for [`GpibApi`](crate::GpibApi).

mod builder;
pub(crate) mod locks;

pub use builder::GpibApiBuilder;
