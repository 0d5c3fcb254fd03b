pub mod approval;
pub mod builder;
pub mod curator;
pub mod doctor;
pub mod judge;
pub mod merge;
pub mod rebase;
pub mod reflection;
