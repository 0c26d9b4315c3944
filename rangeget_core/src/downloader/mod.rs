pub mod chunk_planner;
pub mod chunk_writer;
pub mod http_downloader;
pub mod range_grabber;
pub mod strategy;
pub mod verifier;
