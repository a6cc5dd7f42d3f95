//! Collections: vector stores (optionally fronted by an Assistant) built from documents.

mod helpers;
pub mod openai;
pub mod provider;
mod service;
pub mod types;

pub use helpers::extract_error_message;
pub use openai::OpenAiProvider;
pub use provider::{CollectionProvider, ProviderDocument, ProviderError, ProviderResources};
pub use service::CollectionService;
pub use types::{
    Collection, CollectionActionType, CollectionDetails, CollectionError, CollectionJob,
    CollectionJobStatus, CollectionJobView, CreationRequest, JobCollection,
    VECTOR_STORE_SERVICE_NAME,
};
