//! Tool schemas advertised in the session configuration.

use serde_json::json;

use crate::core::realtime::{FunctionDefinition, ToolDefinition};

pub const FIND_AVAILABLE_SLOTS: &str = "find_available_slots";
pub const BOOK_APPOINTMENT: &str = "book_appointment";

fn function(name: &str, description: &str, parameters: serde_json::Value) -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: name.to_string(),
            description: Some(description.to_string()),
            parameters: Some(parameters),
        },
    }
}

/// The scheduling tools.
pub fn scheduling_tools() -> Vec<ToolDefinition> {
    vec![
        function(
            FIND_AVAILABLE_SLOTS,
            "Cerca gli slot liberi per un intervento. Passa la richiesta del cliente così come \
             l'ha espressa, ad esempio \"il primo giorno disponibile\" o \"la prossima settimana \
             di pomeriggio\".",
            json!({
                "type": "object",
                "properties": {
                    "request": {
                        "type": "string",
                        "description": "Richiesta di disponibilità in linguaggio naturale"
                    }
                },
                "required": ["request"]
            }),
        ),
        function(
            BOOK_APPOINTMENT,
            "Prenota un intervento in uno slot libero confermato dal cliente.",
            json!({
                "type": "object",
                "properties": {
                    "date": {"type": "string", "description": "Data, formato YYYY-MM-DD"},
                    "time": {"type": "string", "description": "Ora di inizio, formato HH:MM"},
                    "customer_name": {"type": "string", "description": "Nome e cognome del cliente"},
                    "customer_phone": {"type": "string", "description": "Numero di telefono del cliente"},
                    "address": {"type": "string", "description": "Indirizzo dell'intervento"}
                },
                "required": ["date", "time", "customer_name", "customer_phone", "address"]
            }),
        ),
    ]
}
