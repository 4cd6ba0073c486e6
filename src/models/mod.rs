// src/models/mod.rs

pub mod answer;
pub mod assessment;
pub mod attempt;
pub mod presentation;
pub mod question;
