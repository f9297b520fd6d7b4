pub mod lifecycle;
pub mod orgtype;
pub mod reconcile;
pub mod types;
