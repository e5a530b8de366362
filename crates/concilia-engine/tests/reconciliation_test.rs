//! End-to-end pipeline tests over in-memory SQLite.

use concilia_config::{BaseTipo, ConfigCancelamento, ConfigConciliacao, ConfigEstorno, KeySet};
use concilia_engine::{Pipeline, PipelineContext};
use concilia_store::{bases, configs, db, results, schema};
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;

async fn setup() -> SqlitePool {
    let pool = db::open_with("sqlite::memory:", &db::SqliteTuning::default())
        .await
        .unwrap();
    schema::ensure_schema(&pool).await.unwrap();
    pool
}

async fn seed_base(
    pool: &SqlitePool,
    tipo: BaseTipo,
    columns: &[(&str, &str)],
    rows: &[Vec<Value>],
) -> concilia_config::Base {
    let nome = match tipo {
        BaseTipo::Contabil => "contábil",
        BaseTipo::Fiscal => "fiscal",
    };
    let base = bases::create(pool, nome, tipo, None).await.unwrap();
    bases::create_base_table(pool, &base.tabela_sqlite, columns).await.unwrap();
    let names: Vec<String> = columns.iter().map(|(n, _)| n.to_string()).collect();
    bases::bulk_insert(pool, &base.tabela_sqlite, &names, rows).await.unwrap();
    base
}

#[allow(clippy::too_many_arguments)]
async fn seed_config(
    pool: &SqlitePool,
    base_a: &concilia_config::Base,
    base_b: &concilia_config::Base,
    chaves_a: &str,
    chaves_b: &str,
    inverter: bool,
    limite: f64,
) -> i64 {
    configs::create_conciliacao(
        pool,
        &ConfigConciliacao {
            id: 0,
            base_contabil_id: base_a.id,
            base_fiscal_id: base_b.id,
            chaves_contabil: KeySet::from_json(chaves_a).unwrap(),
            chaves_fiscal: KeySet::from_json(chaves_b).unwrap(),
            coluna_conciliacao_contabil: "valor".to_string(),
            coluna_conciliacao_fiscal: "valor_nf".to_string(),
            inverter_sinal_fiscal: inverter,
            limite_diferenca_imaterial: limite,
        },
    )
    .await
    .unwrap()
}

#[allow(clippy::too_many_arguments)]
async fn run_job(
    pool: &SqlitePool,
    job_id: i64,
    base_a: &concilia_config::Base,
    base_b: &concilia_config::Base,
    config_id: i64,
    estorno_id: Option<i64>,
    cancelamento_id: Option<i64>,
) {
    let ctx = PipelineContext::new(
        pool.clone(),
        job_id,
        base_a.id,
        base_b.id,
        config_id,
        estorno_id,
        cancelamento_id,
    );
    Pipeline::standard().run(&ctx).await.unwrap();
}

async fn result_rows(pool: &SqlitePool, job_id: i64) -> Vec<Map<String, Value>> {
    results::fetch_rows(pool, job_id).await.unwrap()
}

fn f64_of(row: &Map<String, Value>, col: &str) -> f64 {
    row.get(col).and_then(Value::as_f64).unwrap()
}

fn str_of<'a>(row: &'a Map<String, Value>, col: &str) -> &'a str {
    row.get(col).and_then(Value::as_str).unwrap()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn exact_match_on_single_key() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[vec![json!("X"), json!(100.0)], vec![json!("Y"), json!(50.0)]],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[vec![json!("X"), json!(100.0)], vec![json!("Y"), json!(50.0)]],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;

    run_job(&pool, 1, &base_a, &base_b, config_id, None, None).await;

    let rows = result_rows(&pool, 1).await;
    assert_eq!(rows.len(), 4);

    let x_rows: Vec<_> = rows.iter().filter(|r| str_of(r, "CHAVE_1") == "X").collect();
    assert_eq!(x_rows.len(), 2);
    for row in &x_rows {
        assert_eq!(str_of(row, "status"), "01_Conciliado");
        assert_eq!(str_of(row, "grupo"), "Conciliado");
        assert_eq!(str_of(row, "chave"), "CHAVE_1");
        assert!(approx(f64_of(row, "value_a"), 100.0));
        assert!(approx(f64_of(row, "value_b"), 100.0));
        assert!(approx(f64_of(row, "difference"), 0.0));
    }
    assert!(x_rows.iter().any(|r| r.get("a_row_id") == Some(&json!(1))));
    assert!(x_rows.iter().any(|r| r.get("b_row_id") == Some(&json!(1))));

    // Every result row references exactly one side.
    for row in &rows {
        let has_a = row.get("a_row_id") != Some(&Value::Null);
        let has_b = row.get("b_row_id") != Some(&Value::Null);
        assert!(has_a ^ has_b);
    }
}

#[tokio::test]
async fn immaterial_difference_within_limit() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[vec![json!("K"), json!(100.0)]],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[vec![json!("K"), json!(100.005)]],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.01,
    )
    .await;

    run_job(&pool, 2, &base_a, &base_b, config_id, None, None).await;

    let rows = result_rows(&pool, 2).await;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(str_of(row, "status"), "02_Encontrado c/Diferença");
        assert_eq!(str_of(row, "grupo"), "Diferença Imaterial");
        assert!(approx(f64_of(row, "value_a"), 100.0));
        assert!(approx(f64_of(row, "value_b"), 100.005));
        assert!(approx(f64_of(row, "difference"), -0.005));
    }
}

#[tokio::test]
async fn material_difference_base_a_maior() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[vec![json!("K"), json!(200.0)]],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[vec![json!("K"), json!(150.0)]],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;

    run_job(&pool, 3, &base_a, &base_b, config_id, None, None).await;

    let rows = result_rows(&pool, 3).await;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(str_of(row, "status"), "02_Encontrado c/Diferença");
        assert_eq!(str_of(row, "grupo"), "Encontrado com diferença, BASE A MAIOR");
        assert!(approx(f64_of(row, "difference"), 50.0));
    }
}

#[tokio::test]
async fn sign_inversion_flips_fiscal_amounts() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[vec![json!("K"), json!(100.0)]],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[vec![json!("K"), json!(-100.0)]],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        true,
        0.0,
    )
    .await;

    run_job(&pool, 4, &base_a, &base_b, config_id, None, None).await;

    let rows = result_rows(&pool, 4).await;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(str_of(row, "status"), "01_Conciliado");
        assert!(approx(f64_of(row, "value_b"), 100.0));
        assert!(approx(f64_of(row, "difference"), 0.0));
    }
}

#[tokio::test]
async fn estorno_neutralizes_before_matching() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[
            vec![json!("X"), json!(100.0)],
            vec![json!("X"), json!(-100.0)],
            vec![json!("Y"), json!(50.0)],
        ],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[vec![json!("Y"), json!(50.0)]],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;
    let estorno_id = configs::create_estorno(
        &pool,
        &ConfigEstorno {
            id: 0,
            base_id: base_a.id,
            coluna_a: "doc".to_string(),
            coluna_b: "doc".to_string(),
            coluna_soma: "valor".to_string(),
            limite_zero: 0.0,
        },
    )
    .await
    .unwrap();

    run_job(&pool, 5, &base_a, &base_b, config_id, Some(estorno_id), None).await;

    let rows = result_rows(&pool, 5).await;
    assert_eq!(rows.len(), 4);

    let estornados: Vec<_> = rows
        .iter()
        .filter(|r| str_of(r, "grupo") == "Conciliado_Estorno")
        .collect();
    assert_eq!(estornados.len(), 2);
    for row in &estornados {
        assert_eq!(str_of(row, "status"), "01_Conciliado");
        assert_eq!(str_of(row, "chave"), "X_1_2");
    }

    let conciliados: Vec<_> = rows
        .iter()
        .filter(|r| str_of(r, "grupo") == "Conciliado")
        .collect();
    assert_eq!(conciliados.len(), 2);
    assert!(conciliados
        .iter()
        .any(|r| r.get("a_row_id") == Some(&json!(3))));
}

#[tokio::test]
async fn cancelamento_suppresses_fiscal_rows() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[vec![json!("K"), json!(200.0)]],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL"), ("situacao", "TEXT")],
        &[
            vec![json!("K"), json!(100.0), json!("CANCELADA")],
            vec![json!("K"), json!(200.0), json!("ATIVA")],
        ],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;
    let cancelamento_id = configs::create_cancelamento(
        &pool,
        &ConfigCancelamento {
            id: 0,
            base_id: base_b.id,
            coluna_indicador: "situacao".to_string(),
            valor_cancelado: "CANCELADA".to_string(),
            valor_nao_cancelado: "ATIVA".to_string(),
        },
    )
    .await
    .unwrap();

    run_job(&pool, 6, &base_a, &base_b, config_id, None, Some(cancelamento_id)).await;

    let rows = result_rows(&pool, 6).await;
    assert_eq!(rows.len(), 3);

    let cancelada = rows
        .iter()
        .find(|r| r.get("b_row_id") == Some(&json!(1)))
        .unwrap();
    assert_eq!(str_of(cancelada, "status"), "04_Não avaliado");
    assert_eq!(str_of(cancelada, "grupo"), "NF Cancelada");

    let conciliados: Vec<_> = rows
        .iter()
        .filter(|r| str_of(r, "grupo") == "Conciliado")
        .collect();
    assert_eq!(conciliados.len(), 2);
    for row in &conciliados {
        assert!(approx(f64_of(row, "value_a"), 200.0));
        assert!(approx(f64_of(row, "value_b"), 200.0));
    }
}

#[tokio::test]
async fn unmatched_rows_become_residuals() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[vec![json!("SOMENTE_A"), json!(75.0)]],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[vec![json!("SOMENTE_B"), json!(25.0)]],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;

    run_job(&pool, 7, &base_a, &base_b, config_id, None, None).await;

    let rows = result_rows(&pool, 7).await;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(str_of(row, "status"), "03_Não Encontrado");
        assert_eq!(str_of(row, "grupo"), "Não encontrado");
        assert_eq!(str_of(row, "chave"), "CHAVE_1");
    }
    let a_row = rows.iter().find(|r| r.get("a_row_id") == Some(&json!(1))).unwrap();
    assert!(approx(f64_of(a_row, "value_a"), 75.0));
    assert!(approx(f64_of(a_row, "value_b"), 0.0));
    assert!(approx(f64_of(a_row, "difference"), 75.0));

    let b_row = rows.iter().find(|r| r.get("b_row_id") == Some(&json!(1))).unwrap();
    assert!(approx(f64_of(b_row, "value_b"), 25.0));
    assert!(approx(f64_of(b_row, "difference"), -25.0));
}

#[tokio::test]
async fn empty_bases_produce_an_empty_result_table() {
    let pool = setup().await;
    let base_a = seed_base(&pool, BaseTipo::Contabil, &[("doc", "TEXT"), ("valor", "REAL")], &[])
        .await;
    let base_b =
        seed_base(&pool, BaseTipo::Fiscal, &[("num_doc", "TEXT"), ("valor_nf", "REAL")], &[])
            .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;

    run_job(&pool, 8, &base_a, &base_b, config_id, None, None).await;

    assert!(results::exists(&pool, 8).await.unwrap());
    assert_eq!(results::count(&pool, 8).await.unwrap(), 0);
}

#[tokio::test]
async fn null_keys_join_on_the_normalized_literal() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[vec![Value::Null, json!(10.0)]],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[vec![Value::Null, json!(10.0)]],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;

    run_job(&pool, 9, &base_a, &base_b, config_id, None, None).await;

    let rows = result_rows(&pool, 9).await;
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(str_of(row, "status"), "01_Conciliado");
        assert_eq!(str_of(row, "CHAVE_1"), "NULL");
    }
}

#[tokio::test]
async fn second_key_identifier_catches_first_key_misses() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("cnpj", "TEXT"), ("valor", "REAL")],
        &[
            vec![json!("NF-1"), json!("11.111"), json!(100.0)],
            vec![json!("NF-2"), json!("22.222"), json!(80.0)],
        ],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("cnpj_emitente", "TEXT"), ("valor_nf", "REAL")],
        &[
            vec![json!("NF-1"), json!("11.111"), json!(100.0)],
            // Document number diverges; only the CNPJ matches.
            vec![json!("NF-2-DIVERGENTE"), json!("22.222"), json!(80.0)],
        ],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"],"CHAVE_2":["cnpj"]}"#,
        r#"{"CHAVE_1":["num_doc"],"CHAVE_2":["cnpj_emitente"]}"#,
        false,
        0.0,
    )
    .await;

    run_job(&pool, 10, &base_a, &base_b, config_id, None, None).await;

    let rows = result_rows(&pool, 10).await;
    assert_eq!(rows.len(), 4);

    let first_key: Vec<_> = rows.iter().filter(|r| str_of(r, "chave") == "CHAVE_1").collect();
    let second_key: Vec<_> = rows.iter().filter(|r| str_of(r, "chave") == "CHAVE_2").collect();
    assert_eq!(first_key.len(), 2);
    assert_eq!(second_key.len(), 2);
    for row in &second_key {
        assert_eq!(str_of(row, "status"), "01_Conciliado");
        assert_eq!(str_of(row, "CHAVE_2"), "22.222");
    }
}

fn comparable(rows: &[Map<String, Value>]) -> Vec<Vec<(String, Value)>> {
    let mut out: Vec<Vec<(String, Value)>> = rows
        .iter()
        .map(|row| {
            let mut pairs: Vec<(String, Value)> = row
                .iter()
                .filter(|(k, _)| k.as_str() != "id" && k.as_str() != "created_at")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            pairs
        })
        .collect();
    out.sort_by_key(|pairs| format!("{pairs:?}"));
    out
}

#[tokio::test]
async fn rerun_after_drop_is_identical() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[
            vec![json!("X"), json!(100.0)],
            vec![json!("X"), json!(-100.0)],
            vec![json!("Y"), json!(50.0)],
            vec![json!("Z"), json!(30.0)],
        ],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[vec![json!("Y"), json!(50.0)], vec![json!("W"), json!(5.0)]],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;
    let estorno_id = configs::create_estorno(
        &pool,
        &ConfigEstorno {
            id: 0,
            base_id: base_a.id,
            coluna_a: "doc".to_string(),
            coluna_b: "doc".to_string(),
            coluna_soma: "valor".to_string(),
            limite_zero: 0.0,
        },
    )
    .await
    .unwrap();

    run_job(&pool, 11, &base_a, &base_b, config_id, Some(estorno_id), None).await;
    let first = comparable(&result_rows(&pool, 11).await);

    results::drop_result_table(&pool, 11).await.unwrap();
    run_job(&pool, 11, &base_a, &base_b, config_id, Some(estorno_id), None).await;
    let second = comparable(&result_rows(&pool, 11).await);

    assert_eq!(first, second);
}

#[tokio::test]
async fn double_submission_yields_identical_independent_tables() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[vec![json!("X"), json!(100.0)], vec![json!("Q"), json!(9.0)]],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[vec![json!("X"), json!(100.0)]],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;

    run_job(&pool, 12, &base_a, &base_b, config_id, None, None).await;
    run_job(&pool, 13, &base_a, &base_b, config_id, None, None).await;

    assert!(results::exists(&pool, 12).await.unwrap());
    assert!(results::exists(&pool, 13).await.unwrap());
    assert_eq!(
        comparable(&result_rows(&pool, 12).await),
        comparable(&result_rows(&pool, 13).await)
    );
}

#[tokio::test]
async fn every_base_row_lands_in_exactly_one_result_row() {
    let pool = setup().await;
    let base_a = seed_base(
        &pool,
        BaseTipo::Contabil,
        &[("doc", "TEXT"), ("valor", "REAL")],
        &[
            vec![json!("X"), json!(60.0)],
            vec![json!("X"), json!(40.0)],
            vec![json!("Y"), json!(10.0)],
            vec![json!("ORFA"), json!(1.0)],
        ],
    )
    .await;
    let base_b = seed_base(
        &pool,
        BaseTipo::Fiscal,
        &[("num_doc", "TEXT"), ("valor_nf", "REAL")],
        &[
            vec![json!("X"), json!(100.0)],
            vec![json!("Y"), json!(10.0)],
            vec![json!("ORFA_B"), json!(2.0)],
        ],
    )
    .await;
    let config_id = seed_config(
        &pool,
        &base_a,
        &base_b,
        r#"{"CHAVE_1":["doc"]}"#,
        r#"{"CHAVE_1":["num_doc"]}"#,
        false,
        0.0,
    )
    .await;

    run_job(&pool, 14, &base_a, &base_b, config_id, None, None).await;

    let rows = result_rows(&pool, 14).await;
    let mut a_ids: Vec<i64> = rows
        .iter()
        .filter_map(|r| r.get("a_row_id").and_then(Value::as_i64))
        .collect();
    a_ids.sort_unstable();
    assert_eq!(a_ids, vec![1, 2, 3, 4]);

    let mut b_ids: Vec<i64> = rows
        .iter()
        .filter_map(|r| r.get("b_row_id").and_then(Value::as_i64))
        .collect();
    b_ids.sort_unstable();
    assert_eq!(b_ids, vec![1, 2, 3]);

    // The grouped X entries share their triple (I3).
    let x_rows: Vec<_> = rows
        .iter()
        .filter(|r| str_of(r, "CHAVE_1") == "X" && str_of(r, "grupo") == "Conciliado")
        .collect();
    assert_eq!(x_rows.len(), 3);
    for row in &x_rows {
        assert!(approx(f64_of(row, "value_a"), 100.0));
        assert!(approx(f64_of(row, "value_b"), 100.0));
        assert!(approx(f64_of(row, "difference"), 0.0));
    }
}
