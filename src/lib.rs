pub mod acquisition;
pub mod artifact;
pub mod canonical;
pub mod clock;
pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod handoff;
pub mod pipeline;
pub mod scale;
pub mod selection;
pub mod sensor;
pub mod types;
pub mod udp;
