#![doc = "Solvers for the interactive bisection game played against a challenged assertion."]

pub mod bisection;
