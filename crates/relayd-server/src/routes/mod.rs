pub mod all;
pub mod emergency;
pub mod relay;
pub mod root;
pub mod sequence;
pub mod status;
pub mod sync;
pub mod ws;
