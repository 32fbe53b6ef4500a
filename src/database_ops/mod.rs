pub mod db;
pub mod ootr;
pub mod races;
