//! Message dictionaries, one per supported response language.
//!
//! Templates use `{name}` placeholders that the prompt assembler replaces
//! literally. A placeholder without a value renders as an empty string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en", alias = "english")]
    English,
    #[serde(rename = "it", alias = "italian")]
    Italian,
}

impl Language {
    pub fn tag(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Italian => "it",
        }
    }

    pub fn templates(&self) -> &'static MessageTemplates {
        match self {
            Language::English => &ENGLISH,
            Language::Italian => &ITALIAN,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::English),
            "it" | "italian" => Ok(Language::Italian),
            other => Err(format!("Unsupported language: {}", other)),
        }
    }
}

#[derive(Debug)]
pub struct MessageTemplates {
    pub generate_system: &'static str,
    pub generate_user: &'static str,
    pub generate_tool_description: &'static str,
    pub correct_system: &'static str,
    pub correct_user: &'static str,
    pub correct_tool_description: &'static str,
    pub relationships_header: &'static str,
    pub business_context_header: &'static str,
    pub examples_header: &'static str,
    pub example_item: &'static str,
    pub instructions_header: &'static str,
    pub explain_system: &'static str,
    pub explain_user: &'static str,
    pub explain_detailed_user: &'static str,
    pub fallback_explanation: &'static str,
    pub failure_message: &'static str,
    pub rejected_message: &'static str,
    pub fallback_reasoning: &'static str,
}

static ENGLISH: MessageTemplates = MessageTemplates {
    generate_system: "You are an expert SQL analyst. Translate the user's question into one \
read-only SQL query that runs against the database described below. Use only the tables and \
columns listed. Never modify data.",
    generate_user: "Database schema:\n{schema}\n{relationships}{business_context}{examples}\
{custom_instructions}\nQuestion: {question}\n\nAnswer with the SQL query only.",
    generate_tool_description: "Return the SQL query that answers the question, with your \
confidence between 0 and 1 and a short reasoning.",
    correct_system: "You are an expert SQL analyst. A query you wrote failed. Fix it so it runs \
against the database described below. The fixed query must stay read-only.",
    correct_user: "Question: {question}\n\nFailed SQL:\n{failed_sql}\n\nDatabase error:\n{error}\
\n\nDatabase schema:\n{schema}\n{relationships}{business_context}{examples}\
{custom_instructions}\nAnswer with the corrected SQL query only.",
    correct_tool_description: "Return the corrected SQL query and a short explanation of what \
was wrong.",
    relationships_header: "Relationships:",
    business_context_header: "Business context:",
    examples_header: "Examples:",
    example_item: "{index}. Question: {question}\n   SQL: {sql}",
    instructions_header: "Additional instructions:",
    explain_system: "You explain SQL query results to non-technical users in plain language.",
    explain_user: "Question: {question}\nSQL: {sql}\nThe query returned {row_count} rows. First \
rows:\n{rows}\n\nAnswer the question in one or two sentences using these results.",
    explain_detailed_user: "Question: {question}\nSQL: {sql}\nThe query returned {row_count} \
rows. First rows:\n{rows}\n\nExplain step by step what the query does, which tables and \
filters it uses, and what the results mean.",
    fallback_explanation: "The query ran successfully and returned {row_count} rows.",
    failure_message: "Could not complete this request after {attempts} attempts.",
    rejected_message: "The statement was not executed: {reason}",
    fallback_reasoning: "Corrected from the database error.",
};

static ITALIAN: MessageTemplates = MessageTemplates {
    generate_system: "Sei un esperto analista SQL. Traduci la domanda dell'utente in una sola \
query SQL di sola lettura per il database descritto di seguito. Usa solo le tabelle e le \
colonne elencate. Non modificare mai i dati.",
    generate_user: "Schema del database:\n{schema}\n{relationships}{business_context}{examples}\
{custom_instructions}\nDomanda: {question}\n\nRispondi solo con la query SQL.",
    generate_tool_description: "Restituisci la query SQL che risponde alla domanda, con la tua \
confidenza tra 0 e 1 e un breve ragionamento.",
    correct_system: "Sei un esperto analista SQL. Una query che hai scritto ha generato un \
errore. Correggila affinché funzioni sul database descritto di seguito. La query corretta deve \
restare di sola lettura.",
    correct_user: "Domanda: {question}\n\nSQL fallito:\n{failed_sql}\n\nErrore del database:\n\
{error}\n\nSchema del database:\n{schema}\n{relationships}{business_context}{examples}\
{custom_instructions}\nRispondi solo con la query SQL corretta.",
    correct_tool_description: "Restituisci la query SQL corretta e una breve spiegazione \
dell'errore.",
    relationships_header: "Relazioni:",
    business_context_header: "Contesto aziendale:",
    examples_header: "Esempi:",
    example_item: "{index}. Domanda: {question}\n   SQL: {sql}",
    instructions_header: "Istruzioni aggiuntive:",
    explain_system: "Spieghi i risultati delle query SQL a utenti non tecnici in linguaggio \
semplice.",
    explain_user: "Domanda: {question}\nSQL: {sql}\nLa query ha restituito {row_count} righe. \
Prime righe:\n{rows}\n\nRispondi alla domanda in una o due frasi usando questi risultati.",
    explain_detailed_user: "Domanda: {question}\nSQL: {sql}\nLa query ha restituito {row_count} \
righe. Prime righe:\n{rows}\n\nSpiega passo per passo cosa fa la query, quali tabelle e filtri \
usa e cosa significano i risultati.",
    fallback_explanation: "La query è stata eseguita correttamente e ha restituito {row_count} \
righe.",
    failure_message: "Impossibile completare la richiesta dopo {attempts} tentativi.",
    rejected_message: "L'istruzione non è stata eseguita: {reason}",
    fallback_reasoning: "Corretta a partire dall'errore del database.",
};
