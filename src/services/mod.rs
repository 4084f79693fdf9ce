pub mod http_transfer;
pub mod ncm_client;
