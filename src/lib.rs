pub mod automation;
pub mod category;
pub mod comment;
pub mod db;
pub mod favorite;
pub mod global;
pub mod keyword;
pub mod like;
pub mod middleware;
pub mod ng_word;
pub mod notification;
pub mod orm;
pub mod point;
pub mod post;
pub mod ugc;
pub mod user;
pub mod vote;
pub mod web;

pub use db::get_db_pool;
