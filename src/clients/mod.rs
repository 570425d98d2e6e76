pub mod d1_client;
pub mod object_store;
pub mod portal_client;
pub mod state_store;

pub use d1_client::D1Client;
pub use object_store::{ObjectStore, R2ObjectStore};
pub use portal_client::{PortalClient, PortalResponse, PortalTransport};
pub use state_store::ScrapeStateStore;
