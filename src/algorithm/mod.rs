pub mod activity;
pub mod button;
pub mod compositor;
pub mod detection;
pub mod form_field;
pub mod heat_map;
pub mod latency;
pub mod viewport;
