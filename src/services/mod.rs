pub mod characters;
pub mod hosting;
pub mod illustration;
pub mod image_store;
pub mod pipeline;
pub mod repository;
pub mod url_checker;
