use financial_query_router::{
    analyzer::IntentAnalyzer,
    config::RouterConfig,
    dictionary::EntityDictionary,
    models::ConversationTurn,
    session::{InMemoryCoreferenceStore, SessionManager},
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    dotenv::dotenv().ok();

    info!("Financial Query Router starting");

    let config = Arc::new(RouterConfig::default());
    let dictionary = Arc::new(EntityDictionary::with_builtins());
    let analyzer = IntentAnalyzer::new(config.clone(), dictionary);
    let sessions = SessionManager::new(
        Arc::new(InMemoryCoreferenceStore::new()),
        config.max_history_rounds,
    );

    let user_id = Uuid::new_v4();

    // A short conversation, including a pronoun follow-up
    let queries = [
        "What is the price of Kweichow Moutai?",
        "Show me its price chart for the past month",
        "How are the markets today?",
        "Any GDP numbers out this week?",
    ];

    for query in queries {
        let history = sessions.history(user_id).await;
        let bindings = sessions.bindings(user_id).await;

        let result = analyzer.analyze(query, &history, &bindings).await;

        println!("\n=== {} ===", query);
        println!("intent:    {} ({:.2})", result.primary_intent, result.confidence);
        println!("resolved:  {}", result.resolved_query);
        for entity in &result.entities {
            println!(
                "entity:    {} {} ({}, {:.2})",
                entity.kind, entity.value, entity.display_name, entity.confidence
            );
        }
        if !result.target_symbols.is_empty() {
            println!("symbols:   {}", result.target_symbols.join(", "));
        }
        if !result.target_indices.is_empty() {
            println!("indices:   {}", result.target_indices.join(", "));
        }

        let to_persist = analyzer.bindings_to_persist(&result);
        sessions.persist_bindings(user_id, to_persist).await;
        sessions
            .record_turn(
                user_id,
                ConversationTurn::new(query, "(response elided)")
                    .with_entities(result.entities.clone()),
            )
            .await;
    }

    Ok(())
}
