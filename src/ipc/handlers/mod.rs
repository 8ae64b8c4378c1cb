pub mod attendance;
pub mod classes;
pub mod core;
pub mod fees;
pub mod grades;
pub mod materials;
pub mod notices;
pub mod parents;
pub mod reports;
pub mod students;
pub mod subjects;
pub mod teachers;
