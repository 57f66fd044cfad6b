pub mod bus;
pub mod display;
pub mod driver;
pub mod input;
pub mod poller;
pub mod terminal;
