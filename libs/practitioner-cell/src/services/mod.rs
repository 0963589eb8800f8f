pub mod practitioners;
