pub mod abtest;
pub mod links;
pub mod page;
