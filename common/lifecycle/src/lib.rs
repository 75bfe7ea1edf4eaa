mod handle;

pub use handle::ShutdownHandle;
pub use tokio_util::sync::CancellationToken;
