use financial_query_router::{
    analyzer::IntentAnalyzer,
    api::start_server,
    config::RouterConfig,
    dictionary::EntityDictionary,
    llm::ChatClassifier,
    session::{build_store, SessionManager},
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Financial Query Router - API Server");
    info!("Port: {}", api_port);

    // Entity dictionary: built-ins merged with the mapping file if present
    let mapping_path = std::env::var("STOCK_MAPPING_PATH")
        .unwrap_or_else(|_| "data/stock_mapping.csv".to_string());
    let mut dictionary = EntityDictionary::with_builtins();
    dictionary.load_csv(Path::new(&mapping_path));
    info!("Entity dictionary ready ({} names)", dictionary.len());

    let config = Arc::new(RouterConfig::default());
    let mut analyzer = IntentAnalyzer::new(config.clone(), Arc::new(dictionary));

    // Optional external classifier
    if let Ok(api_key) = std::env::var("CLASSIFIER_API_KEY") {
        let base_url = std::env::var("CLASSIFIER_BASE_URL")
            .unwrap_or_else(|_| "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string());
        let model =
            std::env::var("CLASSIFIER_MODEL").unwrap_or_else(|_| "qwen-plus".to_string());
        info!("External classifier enabled (model: {})", model);
        analyzer = analyzer.with_classifier(Arc::new(ChatClassifier::new(api_key, base_url, model)));
    } else {
        info!("External classifier disabled, using local scoring only");
    }

    let sessions = Arc::new(SessionManager::new(
        build_store(),
        config.max_history_rounds,
    ));

    info!("Starting API server...");
    start_server(Arc::new(analyzer), sessions, api_port).await?;

    Ok(())
}
