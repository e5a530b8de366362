//! Configuration validation.
//!
//! Runs before a job is accepted. Errors accumulate so the caller can show
//! everything wrong with a config at once.

use crate::schema::{Base, BaseTipo, ConfigCancelamento, ConfigConciliacao, ConfigEstorno};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Key identifier '{0}' is missing on the {1} side")]
    MissingKeySide(String, &'static str),

    #[error("Key identifier '{0}' has {1} contábil column(s) but {2} fiscal column(s)")]
    KeyArityMismatch(String, usize, usize),

    #[error("Key identifier '{0}' has an empty column name")]
    EmptyColumnName(String),

    #[error("No key identifiers configured")]
    NoKeys,

    #[error("Reconciliation amount column cannot be empty for the {0} side")]
    EmptyAmountColumn(&'static str),

    #[error("limite_diferenca_imaterial must be non-negative, got {0}")]
    NegativeLimite(f64),

    #[error("limite_zero must be non-negative, got {0}")]
    NegativeLimiteZero(f64),

    #[error("Estorno column '{0}' cannot be empty")]
    EmptyEstornoColumn(&'static str),

    #[error("Cancelamento indicator column cannot be empty")]
    EmptyIndicadorColumn,

    #[error("Base {0} is {1} but the config requires {2}")]
    BaseTipoMismatch(i64, String, String),
}

/// Validate a reconciliation config together with its optional estorno and
/// cancelamento rules. Returns every problem found.
pub fn validate_conciliacao(
    config: &ConfigConciliacao,
    estorno: Option<&ConfigEstorno>,
    cancelamento: Option<&ConfigCancelamento>,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.chaves_contabil.is_empty() && config.chaves_fiscal.is_empty() {
        errors.push(ValidationError::NoKeys);
    }

    for key_id in config.key_identifiers() {
        let a = config.chaves_contabil.columns(&key_id);
        let b = config.chaves_fiscal.columns(&key_id);
        match (a, b) {
            (Some(a_cols), Some(b_cols)) => {
                if a_cols.len() != b_cols.len() {
                    errors.push(ValidationError::KeyArityMismatch(
                        key_id.clone(),
                        a_cols.len(),
                        b_cols.len(),
                    ));
                }
                if a_cols.iter().chain(b_cols).any(|c| c.trim().is_empty()) {
                    errors.push(ValidationError::EmptyColumnName(key_id.clone()));
                }
            }
            (Some(_), None) => {
                errors.push(ValidationError::MissingKeySide(key_id.clone(), "fiscal"))
            }
            (None, Some(_)) => {
                errors.push(ValidationError::MissingKeySide(key_id.clone(), "contábil"))
            }
            (None, None) => {}
        }
    }

    if config.coluna_conciliacao_contabil.trim().is_empty() {
        errors.push(ValidationError::EmptyAmountColumn("contábil"));
    }
    if config.coluna_conciliacao_fiscal.trim().is_empty() {
        errors.push(ValidationError::EmptyAmountColumn("fiscal"));
    }
    if config.limite_diferenca_imaterial < 0.0 {
        errors.push(ValidationError::NegativeLimite(
            config.limite_diferenca_imaterial,
        ));
    }

    if let Some(estorno) = estorno {
        if estorno.limite_zero < 0.0 {
            errors.push(ValidationError::NegativeLimiteZero(estorno.limite_zero));
        }
        for (name, col) in [
            ("coluna_a", &estorno.coluna_a),
            ("coluna_b", &estorno.coluna_b),
            ("coluna_soma", &estorno.coluna_soma),
        ] {
            if col.trim().is_empty() {
                errors.push(ValidationError::EmptyEstornoColumn(name));
            }
        }
    }

    if let Some(cancelamento) = cancelamento {
        if cancelamento.coluna_indicador.trim().is_empty() {
            errors.push(ValidationError::EmptyIndicadorColumn);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check that a per-job base override is compatible with the slot it fills.
pub fn validate_base_override(base: &Base, expected: BaseTipo) -> Result<(), ValidationError> {
    if base.tipo != expected {
        return Err(ValidationError::BaseTipoMismatch(
            base.id,
            base.tipo.as_str().to_string(),
            expected.as_str().to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::KeySet;

    fn valid_config() -> ConfigConciliacao {
        ConfigConciliacao {
            id: 1,
            base_contabil_id: 1,
            base_fiscal_id: 2,
            chaves_contabil: KeySet::from_json(r#"{"CHAVE_1":["doc"]}"#).unwrap(),
            chaves_fiscal: KeySet::from_json(r#"{"CHAVE_1":["num_doc"]}"#).unwrap(),
            coluna_conciliacao_contabil: "valor".to_string(),
            coluna_conciliacao_fiscal: "valor_nf".to_string(),
            inverter_sinal_fiscal: false,
            limite_diferenca_imaterial: 0.01,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_conciliacao(&valid_config(), None, None).is_ok());
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let mut config = valid_config();
        config.chaves_fiscal = KeySet::from_json(r#"{"CHAVE_1":["num_doc","serie"]}"#).unwrap();
        let errors = validate_conciliacao(&config, None, None).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::KeyArityMismatch(_, 1, 2))));
    }

    #[test]
    fn key_missing_on_one_side() {
        let mut config = valid_config();
        config.chaves_fiscal = KeySet::default();
        let errors = validate_conciliacao(&config, None, None).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::MissingKeySide(_, "fiscal"))));
    }

    #[test]
    fn no_keys_at_all() {
        let mut config = valid_config();
        config.chaves_contabil = KeySet::default();
        config.chaves_fiscal = KeySet::default();
        let errors = validate_conciliacao(&config, None, None).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::NoKeys)));
    }

    #[test]
    fn negative_limite_rejected() {
        let mut config = valid_config();
        config.limite_diferenca_imaterial = -0.5;
        let errors = validate_conciliacao(&config, None, None).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::NegativeLimite(_))));
    }

    #[test]
    fn empty_amount_column_rejected() {
        let mut config = valid_config();
        config.coluna_conciliacao_fiscal = "  ".to_string();
        let errors = validate_conciliacao(&config, None, None).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::EmptyAmountColumn("fiscal"))));
    }

    #[test]
    fn estorno_errors_accumulate() {
        let estorno = ConfigEstorno {
            id: 1,
            base_id: 1,
            coluna_a: "".to_string(),
            coluna_b: "doc".to_string(),
            coluna_soma: "valor".to_string(),
            limite_zero: -1.0,
        };
        let errors = validate_conciliacao(&valid_config(), Some(&estorno), None).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::NegativeLimiteZero(_))));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::EmptyEstornoColumn("coluna_a"))));
    }

    #[test]
    fn cancelamento_indicator_required() {
        let cancelamento = ConfigCancelamento {
            id: 1,
            base_id: 2,
            coluna_indicador: "".to_string(),
            valor_cancelado: "CANCELADA".to_string(),
            valor_nao_cancelado: "ATIVA".to_string(),
        };
        let errors =
            validate_conciliacao(&valid_config(), None, Some(&cancelamento)).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::EmptyIndicadorColumn)));
    }

    #[test]
    fn base_override_type_check() {
        let base = Base {
            id: 9,
            nome: "fiscal 2024".to_string(),
            tipo: BaseTipo::Fiscal,
            tabela_sqlite: "base_9".to_string(),
            subtype: None,
        };
        assert!(validate_base_override(&base, BaseTipo::Fiscal).is_ok());
        assert!(matches!(
            validate_base_override(&base, BaseTipo::Contabil),
            Err(ValidationError::BaseTipoMismatch(9, _, _))
        ));
    }
}
