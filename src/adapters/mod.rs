// Adapters layer: concrete lifecycle runtimes behind the domain port.

pub mod docker;
pub mod memory;
pub mod retry;

pub use docker::DockerAdapter;
pub use memory::ScriptedRuntime;
pub use retry::RetryingAdapter;
