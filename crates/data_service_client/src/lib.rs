pub mod cancellation;
pub mod client;
pub mod counter;
pub mod element;
pub mod error;
pub mod rpc;

pub use cancellation::CancellationManager;
pub use client::{DataServiceConfig, DataServiceDataset, DataServiceIterator, AUTOTUNE};
pub use element::{CompressedElement, DataType, OpaqueTensor, PartialShape};
pub use error::{Code, Result, Status};
pub use rpc::{ClientFactory, DispatcherClient, ProcessingMode, WorkerClient};
