//! Document uploads, object storage and transformation jobs.

mod service;
pub mod storage;
pub mod types;

pub use service::{DocumentService, NewUpload, UploadOutcome, transformed_fname};
pub use storage::{DocumentStorage, LocalStorage, StorageError};
pub use types::{
    Document, DocumentError, DocumentFormat, DocumentUploadResponse, TransformationJob,
    TransformationJobInfo, TransformationJobView, TransformationJobsView, TransformationPlan,
    TransformationStatus,
};
