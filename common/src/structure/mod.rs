pub mod postponed;
