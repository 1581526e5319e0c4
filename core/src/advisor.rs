use async_trait::async_trait;
use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{FoodEntry, NewFoodEntry, UserProfile, lenient_f64};

pub const CHAT_MODEL: &str = "llama-3.3-70b-versatile";
pub const VISION_MODEL: &str = "llama-3.2-11b-vision-preview";

pub const COACH_SYSTEM_PROMPT: &str = "You are an elite AI Calorie Coach. You provide precise, \
scientific, and motivating nutrition advice. Use the Llama 3.3 70b model capabilities to analyze \
user data and provide real-time insights. Be concise but extremely helpful.";

pub const COACH_FALLBACK: &str =
    "I'm having trouble connecting to my AI core right now. Let's try again in a moment.";

const VISION_PROMPT: &str = "Identify the food in this image. Return the result in JSON format \
with fields: name, calories (per 100g), protein, carbs, fat, and serving (usually '100g'). Be \
accurate based on the visual content. If multiple items are present, identify the main one.";

const MAX_COMPLETION_TOKENS: u32 = 1024;

/// Most estimates returned by a food search.
pub const SEARCH_LIMIT: usize = 3;

// --- Wire types (OpenAI-compatible chat completions) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    #[must_use]
    pub fn system(text: &str) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[must_use]
    pub fn user(text: &str) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice, if any.
    #[must_use]
    pub fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
    }
}

#[must_use]
pub fn coach_request(prompt: &str) -> ChatRequest {
    ChatRequest {
        model: CHAT_MODEL.to_string(),
        messages: vec![
            ChatMessage::system(COACH_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ],
        temperature: 0.7,
        max_completion_tokens: Some(MAX_COMPLETION_TOKENS),
        top_p: Some(1.0),
        stream: false,
    }
}

#[must_use]
pub fn vision_request(image_base64: &str) -> ChatRequest {
    ChatRequest {
        model: VISION_MODEL.to_string(),
        messages: vec![ChatMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: VISION_PROMPT.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/jpeg;base64,{image_base64}"),
                    },
                },
            ]),
        }],
        temperature: 0.1,
        max_completion_tokens: Some(MAX_COMPLETION_TOKENS),
        top_p: None,
        stream: false,
    }
}

#[must_use]
pub fn search_request(query: &str) -> ChatRequest {
    ChatRequest {
        model: CHAT_MODEL.to_string(),
        messages: vec![ChatMessage::user(&search_prompt(query))],
        temperature: 0.2,
        max_completion_tokens: None,
        top_p: None,
        stream: false,
    }
}

#[must_use]
pub fn search_prompt(query: &str) -> String {
    format!(
        "Provide nutritional data for \"{query}\". Return a JSON array of up to 3 similar food \
         items. Each item must have: name, calories (per 100g), protein, carbs, fat, and serving \
         (usually '100g'). Only return the JSON."
    )
}

// --- Plan input and output ---

/// The user data a health plan is generated from.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub full_name: String,
    pub age: u32,
    pub gender: String,
    pub goal: String,
    pub workout_frequency: String,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub preferred_cuisine: String,
}

impl From<&UserProfile> for PlanRequest {
    fn from(p: &UserProfile) -> Self {
        Self {
            full_name: p.full_name.clone(),
            age: p.age,
            gender: p.gender.clone(),
            goal: p.goal.to_string(),
            workout_frequency: p.workout_frequency.clone(),
            height_cm: p.height,
            weight_kg: p.weight,
            preferred_cuisine: p.preferred_cuisine.clone(),
        }
    }
}

#[must_use]
pub fn health_plan_prompt(req: &PlanRequest) -> String {
    format!(
        "Based on the following user data, generate a personalized nutrition and health plan.
User Data:
- Name: {name}
- Age: {age}
- Gender: {gender}
- Goal: {goal}
- Activity Level: {activity}
- Height: {height}cm
- Weight: {weight}kg
- Preferred Cuisine: {cuisine}

Please provide:
1. Daily Calorie Target
2. Macro Distribution (Protein, Carbs, Fat in grams)
3. A brief motivational tip
4. One custom meal suggestion based on their preferred cuisine.
5. A detailed Diet Strategy (e.g., specific foods to avoid, timing, hydration).
6. A weekly Workout Plan (e.g., type of exercises, frequency, intensity).

Format the response as JSON so I can parse it easily.
Example Format:
{{
  \"dailyCaloriesTarget\": 2200,
  \"protein\": 160,
  \"carbs\": 240,
  \"fat\": 70,
  \"tip\": \"...\",
  \"mealSuggestion\": \"...\",
  \"dietStrategy\": \"Detailed nutritional guide...\",
  \"workoutPlan\": \"Detailed weekly workout routine...\"
}}",
        name = req.full_name,
        age = req.age,
        gender = req.gender,
        goal = req.goal,
        activity = req.workout_frequency,
        height = req.height_cm,
        weight = req.weight_kg,
        cuisine = req.preferred_cuisine,
    )
}

/// A generated plan. Fields the model adds beyond the known ones are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthPlan {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub daily_calories_target: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diet_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workout_plan: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HealthPlan {
    /// A plan without a positive calorie target cannot drive a profile.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.daily_calories_target > 0.0
    }
}

/// Nutrition estimate per serving (usually 100 g).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEstimate {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub calories: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fat: f64,
    #[serde(default = "default_serving")]
    pub serving: String,
}

fn default_serving() -> String {
    "100g".to_string()
}

impl FoodEstimate {
    #[must_use]
    pub fn into_new_food_entry(self) -> NewFoodEntry {
        NewFoodEntry {
            name: self.name,
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            serving_size: self.serving,
        }
    }

    #[must_use]
    pub fn into_entry(self) -> FoodEntry {
        self.into_new_food_entry().into_entry()
    }
}

// --- JSON extraction ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Object,
    Array,
}

impl Delimiter {
    fn pair(self) -> (u8, u8) {
        match self {
            Self::Object => (b'{', b'}'),
            Self::Array => (b'[', b']'),
        }
    }
}

/// Find the first balanced `{...}` or `[...]` span in free text.
///
/// Delimiters inside JSON string literals are ignored. An opener that never
/// closes is skipped in favour of the next one.
#[must_use]
pub fn extract_json(text: &str, delimiter: Delimiter) -> Option<&str> {
    let (open, close) = delimiter.pair();
    let bytes = text.as_bytes();

    let mut start = 0;
    while let Some(offset) = bytes[start..].iter().position(|&b| b == open) {
        let begin = start + offset;
        if let Some(end) = balanced_end(bytes, begin, open, close) {
            return Some(&text[begin..=end]);
        }
        start = begin + 1;
    }
    None
}

fn balanced_end(bytes: &[u8], begin: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(begin) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// --- Client ---

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Inference request failed: {0}")]
    Transport(String),

    #[error("Malformed JSON in model response: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdvisorError {
    pub fn transport(err: &anyhow::Error) -> Self {
        Self::Transport(format!("{err:#}"))
    }
}

/// Sends one chat-completion request to a hosted model.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse>;
}

/// Stateless request/response client over a [`CompletionProvider`].
///
/// Each operation has a `try_` form that separates "no usable data"
/// (`Ok(None)`) from failure (`Err`), and a plain form that logs the failure
/// and returns a fixed fallback instead.
pub struct Advisor<P> {
    provider: P,
}

impl<P: CompletionProvider> Advisor<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    async fn content(&self, request: &ChatRequest) -> Result<Option<String>, AdvisorError> {
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| AdvisorError::transport(&e))?;
        Ok(response.into_content().filter(|c| !c.trim().is_empty()))
    }

    pub async fn try_coach_response(&self, prompt: &str) -> Result<Option<String>, AdvisorError> {
        self.content(&coach_request(prompt)).await
    }

    pub async fn coach_response(&self, prompt: &str) -> String {
        match self.try_coach_response(prompt).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!("Coach returned an empty response");
                COACH_FALLBACK.to_string()
            }
            Err(e) => {
                error!("Coach request failed: {e}");
                COACH_FALLBACK.to_string()
            }
        }
    }

    pub async fn try_generate_health_plan(
        &self,
        req: &PlanRequest,
    ) -> Result<Option<HealthPlan>, AdvisorError> {
        let content = self.content(&coach_request(&health_plan_prompt(req))).await?;
        parse_span(content.as_deref(), Delimiter::Object)
    }

    pub async fn generate_health_plan(&self, req: &PlanRequest) -> Option<HealthPlan> {
        swallow("Health plan", self.try_generate_health_plan(req).await)
    }

    pub async fn try_detect_food_from_image(
        &self,
        image_base64: &str,
    ) -> Result<Option<FoodEstimate>, AdvisorError> {
        let content = self.content(&vision_request(image_base64)).await?;
        parse_span(content.as_deref(), Delimiter::Object)
    }

    pub async fn detect_food_from_image(&self, image_base64: &str) -> Option<FoodEstimate> {
        swallow(
            "Food detection",
            self.try_detect_food_from_image(image_base64).await,
        )
    }

    pub async fn try_search_food(
        &self,
        query: &str,
    ) -> Result<Option<Vec<FoodEstimate>>, AdvisorError> {
        let content = self.content(&search_request(query)).await?;
        let found: Option<Vec<FoodEstimate>> = parse_span(content.as_deref(), Delimiter::Array)?;
        Ok(found.map(|mut items| {
            items.truncate(SEARCH_LIMIT);
            items
        }))
    }

    /// Always a list; failures and empty answers both come back empty.
    pub async fn search_food(&self, query: &str) -> Vec<FoodEstimate> {
        swallow("Food search", self.try_search_food(query).await).unwrap_or_default()
    }
}

fn parse_span<T: DeserializeOwned>(
    content: Option<&str>,
    delimiter: Delimiter,
) -> Result<Option<T>, AdvisorError> {
    match content.and_then(|c| extract_json(c, delimiter)) {
        Some(span) => Ok(Some(serde_json::from_str(span)?)),
        None => Ok(None),
    }
}

fn swallow<T>(what: &str, result: Result<Option<T>, AdvisorError>) -> Option<T> {
    result.unwrap_or_else(|e| {
        error!("{what} failed: {e}");
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replies with canned content, or fails when `None`.
    struct MockProvider {
        reply: Option<String>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl MockProvider {
        fn replying(text: &str) -> Self {
            Self {
                reply: Some(text.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> ChatRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl CompletionProvider for MockProvider {
        async fn complete(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let Some(reply) = &self.reply else {
                anyhow::bail!("connection refused");
            };
            Ok(serde_json::from_value(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": reply}}]
            }))?)
        }
    }

    fn plan_request() -> PlanRequest {
        PlanRequest {
            full_name: "Ana Souza".to_string(),
            age: 31,
            gender: "female".to_string(),
            goal: "lose".to_string(),
            workout_frequency: "3-5".to_string(),
            height_cm: 168.0,
            weight_kg: 64.5,
            preferred_cuisine: "Mediterranean".to_string(),
        }
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = "Sure! Here is your plan:\n{\"a\": {\"b\": 1}} Enjoy {not json}";
        assert_eq!(
            extract_json(text, Delimiter::Object),
            Some("{\"a\": {\"b\": 1}}")
        );
    }

    #[test]
    fn test_extract_json_ignores_braces_in_strings() {
        let text = r#"{"tip": "use {braces} and \"quotes\" }", "n": 2} trailing"#;
        assert_eq!(
            extract_json(text, Delimiter::Object),
            Some(r#"{"tip": "use {braces} and \"quotes\" }", "n": 2}"#)
        );
    }

    #[test]
    fn test_extract_json_array() {
        let text = "Results: [{\"name\": \"Rice\"}, {\"name\": \"Oats\"}] done";
        assert_eq!(
            extract_json(text, Delimiter::Array),
            Some("[{\"name\": \"Rice\"}, {\"name\": \"Oats\"}]")
        );
    }

    #[test]
    fn test_extract_json_none() {
        assert_eq!(extract_json("no json here", Delimiter::Object), None);
        assert_eq!(extract_json("unclosed { brace", Delimiter::Object), None);
        assert_eq!(extract_json("{\"a\": 1}", Delimiter::Array), None);
    }

    #[test]
    fn test_extract_json_skips_unclosed_opener() {
        assert_eq!(extract_json("[ oops ", Delimiter::Array), None);
        assert_eq!(
            extract_json("a { b [1] and then {\"x\": 1", Delimiter::Object),
            None
        );
        assert_eq!(
            extract_json("} {\"x\": 1}", Delimiter::Object),
            Some("{\"x\": 1}")
        );
    }

    #[test]
    fn test_coach_request_parameters() {
        let req = coach_request("hello");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "llama-3.3-70b-versatile");
        assert_eq!(json["temperature"], 0.7);
        assert_eq!(json["max_completion_tokens"], 1024);
        assert_eq!(json["top_p"], 1.0);
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_vision_request_shape() {
        let json = serde_json::to_value(vision_request("QUJD")).unwrap();
        assert_eq!(json["model"], "llama-3.2-11b-vision-preview");
        assert_eq!(json["temperature"], 0.1);
        assert!(json.get("top_p").is_none());
        let parts = &json["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
    }

    #[test]
    fn test_search_request_shape() {
        let json = serde_json::to_value(search_request("banana")).unwrap();
        assert_eq!(json["temperature"], 0.2);
        assert!(json.get("max_completion_tokens").is_none());
        let prompt = json["messages"][0]["content"].as_str().unwrap();
        assert!(prompt.starts_with("Provide nutritional data for \"banana\"."));
    }

    #[test]
    fn test_health_plan_prompt_embeds_profile() {
        let prompt = health_plan_prompt(&plan_request());
        assert!(prompt.contains("- Name: Ana Souza"));
        assert!(prompt.contains("- Height: 168cm"));
        assert!(prompt.contains("- Weight: 64.5kg"));
        assert!(prompt.contains("\"dailyCaloriesTarget\": 2200,"));
    }

    #[tokio::test]
    async fn test_generate_health_plan_from_prose() {
        let reply = "Here's your plan!\n{\"dailyCaloriesTarget\": 1850, \"protein\": 140, \
                     \"carbs\": 180, \"fat\": 60, \"tip\": \"Walk daily\", \
                     \"mealSuggestion\": \"Greek salad\", \"dietStrategy\": \"Less sugar\", \
                     \"workoutPlan\": \"3x strength\", \"hydration\": \"2L\"}\nGood luck!";
        let advisor = Advisor::new(MockProvider::replying(reply));
        let plan = advisor.generate_health_plan(&plan_request()).await.unwrap();
        assert!((plan.daily_calories_target - 1850.0).abs() < f64::EPSILON);
        assert!((plan.protein - 140.0).abs() < f64::EPSILON);
        assert_eq!(plan.tip.as_deref(), Some("Walk daily"));
        assert_eq!(plan.workout_plan.as_deref(), Some("3x strength"));
        assert_eq!(plan.extra.get("hydration"), Some(&Value::from("2L")));

        let req = advisor.provider().last_request();
        assert_eq!(req.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_generate_health_plan_without_json_is_none() {
        let advisor = Advisor::new(MockProvider::replying("I cannot help with that."));
        assert!(advisor.generate_health_plan(&plan_request()).await.is_none());
        assert!(matches!(
            advisor.try_generate_health_plan(&plan_request()).await,
            Ok(None)
        ));
    }

    #[tokio::test]
    async fn test_generate_health_plan_malformed_json_is_error() {
        let advisor = Advisor::new(MockProvider::replying("{\"dailyCaloriesTarget\": }"));
        assert!(matches!(
            advisor.try_generate_health_plan(&plan_request()).await,
            Err(AdvisorError::Json(_))
        ));
        assert!(advisor.generate_health_plan(&plan_request()).await.is_none());
    }

    #[tokio::test]
    async fn test_generate_health_plan_keeps_partial_object() {
        let advisor = Advisor::new(MockProvider::replying(
            "Here you go: {\"protein\": 160, \"tip\": \"Walk\"}",
        ));
        let plan = advisor.generate_health_plan(&plan_request()).await.unwrap();
        assert!((plan.protein - 160.0).abs() < f64::EPSILON);
        assert_eq!(plan.tip.as_deref(), Some("Walk"));
        assert!(!plan.is_usable());
    }

    #[tokio::test]
    async fn test_transport_failure_is_distinguishable() {
        let advisor = Advisor::new(MockProvider::failing());
        assert!(matches!(
            advisor.try_generate_health_plan(&plan_request()).await,
            Err(AdvisorError::Transport(_))
        ));
        assert!(advisor.generate_health_plan(&plan_request()).await.is_none());
    }

    #[tokio::test]
    async fn test_coach_fallback() {
        let advisor = Advisor::new(MockProvider::failing());
        assert_eq!(advisor.coach_response("hi").await, COACH_FALLBACK);

        let advisor = Advisor::new(MockProvider::replying("  "));
        assert_eq!(advisor.coach_response("hi").await, COACH_FALLBACK);

        let advisor = Advisor::new(MockProvider::replying("Eat more fibre."));
        assert_eq!(advisor.coach_response("hi").await, "Eat more fibre.");
    }

    #[tokio::test]
    async fn test_detect_food_from_image() {
        let reply = "```json\n{\"name\": \"Banana\", \"calories\": 89, \"protein\": 1.1, \
                     \"carbs\": 22.8, \"fat\": 0.3}\n```";
        let advisor = Advisor::new(MockProvider::replying(reply));
        let food = advisor.detect_food_from_image("QUJD").await.unwrap();
        assert_eq!(food.name, "Banana");
        assert!((food.calories - 89.0).abs() < f64::EPSILON);
        assert_eq!(food.serving, "100g");

        let entry = food.into_entry();
        assert_eq!(entry.serving_size, "100g");
        assert!(!entry.id.is_empty());

        let advisor = Advisor::new(MockProvider::failing());
        assert!(advisor.detect_food_from_image("QUJD").await.is_none());
    }

    #[tokio::test]
    async fn test_search_food_truncates_to_three() {
        let reply = "[{\"name\": \"A\", \"calories\": 1}, {\"name\": \"B\", \"calories\": 2}, \
                     {\"name\": \"C\", \"calories\": 3}, {\"name\": \"D\", \"calories\": 4}]";
        let advisor = Advisor::new(MockProvider::replying(reply));
        let found = advisor.search_food("letters").await;
        let names: Vec<&str> = found.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_search_food_failures_are_empty() {
        let advisor = Advisor::new(MockProvider::failing());
        assert!(advisor.search_food("rice").await.is_empty());

        let advisor = Advisor::new(MockProvider::replying("Sorry, no idea."));
        assert!(advisor.search_food("rice").await.is_empty());
        assert!(matches!(advisor.try_search_food("rice").await, Ok(None)));

        let advisor = Advisor::new(MockProvider::replying("[1, 2"));
        assert!(advisor.search_food("rice").await.is_empty());
    }

    #[test]
    fn test_plan_request_from_profile() {
        let profile = UserProfile {
            full_name: "Ana".to_string(),
            height: 170.0,
            weight: 70.0,
            ..UserProfile::default()
        };
        let req = PlanRequest::from(&profile);
        assert_eq!(req.goal, "maintain");
        assert!((req.height_cm - 170.0).abs() < f64::EPSILON);
    }
}
