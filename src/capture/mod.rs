pub mod host;
pub mod render_loop;
