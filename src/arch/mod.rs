pub mod tensorcore;
