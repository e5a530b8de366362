//! The five pipeline steps, in execution order: Nulls-A, Estorno-A, Nulls-B,
//! Cancelamento-B, Conciliação-AB.

pub mod cancelamento;
pub mod conciliacao;
pub mod estorno;
pub mod nulls;
