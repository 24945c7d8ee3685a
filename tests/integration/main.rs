//! Integration tests for minicache

mod cli;
mod cross_process;
mod facade;
mod support;
