pub mod cpu;

pub use cpu::ReferenceBlas;
