pub mod server;

pub use server::RouterServer;
