pub mod links;
pub mod sections;
pub mod spell;
