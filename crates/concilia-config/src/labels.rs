//! Status and group labels written to marks and result rows.
//!
//! These strings are part of the persisted contract (result tables are read
//! back by the exporter and by downstream reports), so they are centralized
//! here rather than inlined at the call sites.

/// Result/mark status values.
pub mod status {
    pub const CONCILIADO: &str = "01_Conciliado";
    pub const ENCONTRADO_COM_DIFERENCA: &str = "02_Encontrado c/Diferença";
    pub const NAO_ENCONTRADO: &str = "03_Não Encontrado";
    pub const NAO_AVALIADO: &str = "04_Não avaliado";
}

/// Group labels attached alongside the status.
pub mod grupo {
    pub const CONCILIADO: &str = "Conciliado";
    pub const DIFERENCA_IMATERIAL: &str = "Diferença Imaterial";
    pub const BASE_A_MAIOR: &str = "Encontrado com diferença, BASE A MAIOR";
    pub const BASE_B_MAIOR: &str = "Encontrado com diferença, BASE B MAIOR";
    pub const NAO_ENCONTRADO: &str = "Não encontrado";
    pub const CONCILIADO_ESTORNO: &str = "Conciliado_Estorno";
    pub const NF_CANCELADA: &str = "NF Cancelada";
}
