//! 浏览器层
//!
//! 连接或启动实例专属的浏览器，并提供 [`ReapBrowserDriver`]。

pub mod connection;
pub mod reap_driver;

pub use connection::{allow_downloads, connect_to_browser_and_page, launch_instance_browser};
pub use reap_driver::ReapBrowserDriver;
