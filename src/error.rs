use crate::handle::RawHandle;

#[derive(Debug, thiserror::Error)]
pub enum FrameGraphError {
    #[error("Handle {handle:?} to resource '{resource}' is stale (current version is {current})")]
    StaleHandle {
        resource: String,
        handle: RawHandle,
        current: u16,
    },

    #[error("Handle {handle:?} to resource '{resource}' was replaced by a forwarded resource")]
    ForwardedHandle { resource: String, handle: RawHandle },

    #[error("Handle {handle:?} does not name a resource of this frame graph")]
    UnknownHandle { handle: RawHandle },

    #[error("Handle {handle:?} is not a '{expected}' resource")]
    TypeMismatch {
        handle: RawHandle,
        expected: &'static str,
    },

    #[error("Pass '{pass}' cannot read resource '{resource}' after writing it")]
    ReadAfterWrite { pass: String, resource: String },

    #[error("Cannot forward resource '{resource}' onto itself")]
    ForwardOntoItself { resource: String },

    #[error("Pass '{pass}' did not declare resource '{resource}'")]
    UndeclaredResource { pass: String, resource: String },

    #[error("Resource '{resource}' has no concrete backing in pass '{pass}'")]
    ResourceNotResolved { pass: String, resource: String },

    #[error("Render target {id} was not declared by pass '{pass}'")]
    RenderTargetNotFound { pass: String, id: u32 },

    #[error("Cannot {operation} while the frame graph is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: crate::FrameGraphState,
    },

    #[error("Too many {what} in one frame (limit is {limit})")]
    CapacityExceeded { what: &'static str, limit: usize },

    #[error("Failed to allocate resource '{resource}'")]
    Allocation {
        resource: String,
        #[source]
        source: AllocationError,
    },
}

/// Failure reported by a [`ResourceAllocator`](crate::ResourceAllocator).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("Out of device memory while creating '{name}'")]
    OutOfMemory { name: String },

    #[error("Unsupported descriptor for '{name}': {reason}")]
    Unsupported { name: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, FrameGraphError>;
