//! Demo delegates: a DHL shipment agent with canned data and a CRM agent whose
//! skills are not wired to a backend yet. With `mock` set, both agents answer
//! from model-generated mock data instead.

use plancraft_agent::{DelegateRegistry, FnSkill, PlanGenerator, SkillAgent};
use plancraft_error::{Error, Result};
use plancraft_vm::{ApiFunction, ApiParam};
use serde_json::{json, Value};
use std::sync::Arc;

const TRACKED_AT: &str = "2023-08-24T07:08:05.016Z";

pub fn registry(planner: Arc<PlanGenerator>, mock: bool) -> Result<DelegateRegistry> {
    let mut registry = DelegateRegistry::new();
    for agent in [shipment_agent(planner.clone())?, crm_agent(planner)?] {
        let agent = if mock { agent.mocked() } else { agent };
        registry.register(Arc::new(agent))?;
    }
    Ok(registry)
}

fn field<'a>(args: &'a [Value], key: &str) -> Option<&'a str> {
    args.first().and_then(|input| input.get(key)).and_then(Value::as_str)
}

fn tracking_number(args: &[Value]) -> Result<String> {
    field(args, "trackingNumber")
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_argument("input.trackingNumber is required"))
}

fn shipment_agent(planner: Arc<PlanGenerator>) -> Result<SkillAgent> {
    SkillAgent::new(
        "Shipment",
        "Use this agent to interact with DHL's shipment and tracking system: tracking, packages and delivery dates. It answers in natural language, or with an error message in natural language.",
        planner,
    )
    .with_type("// Date string in ISO 8601 format, always UTC.\ntype IsoDate = string;")
    .with_type("// 9-digit tracking number.\ntype TrackingNumber = string;")
    .with_skill(FnSkill::new(
        ApiFunction::new("DHLTrackShipment", "Get the tracking info for a package.")
            .param(ApiParam::new("input", "{ trackingNumber: TrackingNumber }"))
            .returns("{ trackingNumber: TrackingNumber; customerFullName: string; status: string; estimatedDeliveryDate: IsoDate; actualDeliveryDate: IsoDate }"),
        |args| {
            tracking_number(&args)?;
            Ok(json!({
                "trackingNumber": "123456789",
                "customerFullName": "Caridy Patino",
                "status": "Pending",
                "estimatedDeliveryDate": TRACKED_AT,
                "actualDeliveryDate": TRACKED_AT,
            }))
        },
    ))?
    .with_skill(FnSkill::new(
        ApiFunction::new(
            "DHLGetAvailableDeliveryDates",
            "Provides a list of alternate delivery dates for a shipment.",
        )
        .param(ApiParam::new(
            "input",
            "{ trackingNumber: TrackingNumber; expectedDeliveryDate: IsoDate }",
        ))
        .returns("IsoDate[]"),
        |args| {
            tracking_number(&args)?;
            Ok(json!(["2023-09-24T07:08:05.016Z", "2023-10-24T07:08:05.016Z"]))
        },
    ))?
    .with_skill(FnSkill::new(
        ApiFunction::new(
            "DHLChangeDeliveryDate",
            "Changes the delivery date of a shipment based on customer request.",
        )
        .param(ApiParam::new(
            "input",
            "{ trackingNumber: TrackingNumber; newDeliveryDate: IsoDate }",
        ))
        .returns("TrackingNumber"),
        |args| Ok(Value::String(tracking_number(&args)?)),
    ))
}

fn declared(name: &str, description: &str, input: &str, returns: &str) -> ApiFunction {
    ApiFunction::new(name, description)
        .param(ApiParam::new("input", input))
        .returns(returns)
}

fn crm_agent(planner: Arc<PlanGenerator>) -> Result<SkillAgent> {
    SkillAgent::new(
        "CRM",
        "Use this agent to interact with the Customer Relationship Management (CRM) system: create, read and update records, and summarize them. It answers in natural language, or with an error message in natural language.",
        planner,
    )
    .with_type("type SObjectType = 'ACCOUNT' | 'LEAD' | 'CONTACT' | 'OPPORTUNITY';")
    .with_type("type RecordId = string;")
    .with_type("type RecordFieldsAndValues = { [key: string]: string };")
    .with_type("type RecordInfo = { recordId: RecordId; SObjectType: SObjectType };")
    .with_declared_skill(declared(
        "createRecord",
        "Creates a new record. Returns the id for the newly created record.",
        "{ SObjectType: SObjectType; fieldValuePairs: RecordFieldsAndValues }",
        "RecordId",
    ))?
    .with_declared_skill(declared(
        "updateRecord",
        "Updates a record.",
        "{ SObjectType: SObjectType; recordId: RecordId; fieldValuePairs: RecordFieldsAndValues }",
        "void",
    ))?
    .with_declared_skill(declared(
        "summarizeRecord",
        "Provides a summary for a given record.",
        "RecordInfo",
        "string",
    ))?
    .with_declared_skill(declared(
        "findSObjectByName",
        "Given a name or a phrase, identifies the corresponding CRM record.",
        "{ objectNameOrIdentifier: string }",
        "RecordInfo",
    ))?
    .with_declared_skill(declared(
        "findSObjectType",
        "Finds an SObjectType from its description.",
        "{ objectNameOrIdentifier: string }",
        "SObjectType",
    ))?
    .with_declared_skill(declared(
        "getRecordFieldsAndValues",
        "Gets record fields and their values from a user message.",
        "{ userMessage: string }",
        "RecordFieldsAndValues",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plancraft_agent::AgentConfig;
    use plancraft_vm::ScriptedProvider;

    fn planner() -> Arc<PlanGenerator> {
        let provider = Arc::new(ScriptedProvider::new(Vec::<String>::new()));
        Arc::new(PlanGenerator::new(provider, &AgentConfig::default()))
    }

    #[test]
    fn test_registry_has_both_agents() {
        let registry = registry(planner(), false).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["CRM", "Shipment"]);
    }

    #[test]
    fn test_crm_skills_are_declared_only() {
        let agent = crm_agent(planner()).unwrap();
        assert!(!agent.is_mocked());
        assert!(agent.skill_names().any(|name| name == "createRecord"));
        assert!(agent.mocked().is_mocked());
    }

    #[test]
    fn test_tracking_number_is_required() {
        assert_eq!(tracking_number(&[json!({"trackingNumber": "123"})]).unwrap(), "123");
        assert!(tracking_number(&[json!({})]).is_err());
    }
}
