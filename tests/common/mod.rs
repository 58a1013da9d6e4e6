pub mod helpers;
pub mod processors;
