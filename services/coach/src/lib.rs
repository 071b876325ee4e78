pub mod audio;
pub mod config;
pub mod playback;
pub mod provider;
pub mod session;
pub mod voice;
