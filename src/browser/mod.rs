pub mod chrome;
pub mod session;
pub mod wait;

pub use chrome::{ChromeSession, ChromeSessionFactory};
pub use session::{scripts, BrowserSession, Element, ElementHandle, SessionFactory};
pub use wait::{body_text, wait_for_document_ready, wait_for_element, wait_until};
