//! End-to-end detection scenarios: rules loaded from JSON descriptions,
//! events fed through the engine, derived events observed via actors.

mod common;

use std::time::Duration;

use common::{capture, engine, event, prop};
use ruleflow::types::Value;

const SCRIPT_FROM_NOTEPAD: &str = r##"{
  "Rules": [
    {
      "RuleName": "ScriptFromNotepad",
      "SourceEvents": [
        { "EventName": "FileCreated",
          "ConnectTo": { "creator_filter": { "SignalParameter": "#MACRO#Context.Event.creator" } } },
        { "EventName": "ScriptExec",
          "ConnectTo": { "exec_join": { "SignalParameter": ["#MACRO#Context.Event.path", 1] } } }
      ],
      "Primitives": [
        { "Type": "StringFilter", "Name": "creator_filter",
          "Parameters": { "Method": "MatchSingle", "Condition": "Equals", "MatchTo": "notepad.exe" },
          "ConnectTo": { "exec_join": { "SignalParameter": ["#MACRO#Context.Event.path", 0] } } },
        { "Type": "KeyedCollectorInOrder", "Name": "exec_join",
          "Parameters": { "SourceCount": 2 },
          "ConnectTo": { "alert": {} } },
        { "Type": "EventGenerator", "Name": "alert",
          "Parameters": { "NewEventName": "MaliciousScriptExec",
                          "Properties": { "Path": "#MACRO#Contexts[1].Event.path" } } }
      ]
    }
  ]
}"##;

#[test]
fn script_created_by_notepad_is_flagged_once() {
    let (engine, meta) = engine();
    engine.add_rules(SCRIPT_FROM_NOTEPAD).unwrap();
    let alerts = capture(&engine, "MaliciousScriptExec");

    engine.process_event(event(
        &meta,
        "ProcessStart",
        &[("name", "notepad.exe".into()), ("pid", Value::Int(1111))],
    ));
    engine.process_event(event(
        &meta,
        "FileCreated",
        &[
            ("path", "script1.ps1".into()),
            ("pid", Value::Int(1234)),
            ("creator", "svchost.exe".into()),
        ],
    ));
    engine.process_event(event(
        &meta,
        "FileCreated",
        &[
            ("path", "script2.ps1".into()),
            ("pid", Value::Int(2222)),
            ("creator", "notepad.exe".into()),
        ],
    ));
    engine.process_event(event(&meta, "ProcessExit", &[("pid", Value::Int(1111))]));
    engine.process_event(event(&meta, "ScriptExec", &[("path", "script1.ps1".into())]));
    engine.process_event(event(&meta, "ScriptExec", &[("path", "script2.ps1".into())]));

    let alerts = alerts.lock();
    assert_eq!(alerts.len(), 1, "only script2 was created by notepad");
    assert_eq!(
        prop(&meta, &alerts[0], "Path"),
        Some(Value::Str("script2.ps1".into()))
    );
}

const REGISTRY_SCORING: &str = r##"{
  "Rules": [
    {
      "RuleName": "RegistryScoring",
      "SourceEvents": [
        { "EventName": "RegistryWrite",
          "ConnectTo": {
            "path1_filter": { "SignalParameter": "#MACRO#Context.Event.path" },
            "path2_filter": { "SignalParameter": "#MACRO#Context.Event.path" }
          } }
      ],
      "Primitives": [
        { "Type": "StringFilter", "Name": "path1_filter",
          "Parameters": { "Method": "MatchSingle", "Condition": "Equals", "MatchTo": "path_1" },
          "ConnectTo": { "name1_filter": { "SignalParameter": "#MACRO#Context.Event.name" } } },
        { "Type": "StringFilter", "Name": "name1_filter",
          "Parameters": { "Method": "MatchSingle", "Condition": "Equals", "MatchTo": "name_1" },
          "ConnectTo": { "score": { "SignalParameter": 20 } } },
        { "Type": "StringFilter", "Name": "path2_filter",
          "Parameters": { "Method": "MatchSingle", "Condition": "Equals", "MatchTo": "path_2" },
          "ConnectTo": { "value_filter": { "SignalParameter": "#MACRO#Context.Event.value" } } },
        { "Type": "IntegerFilter", "Name": "value_filter",
          "Parameters": { "Condition": "OneOf", "CompareTo": [0, 1] },
          "ConnectTo": { "score": { "SignalParameter": 30 } } },
        { "Type": "Accumulator", "Name": "score",
          "Parameters": { "Threshold": 60 },
          "ConnectTo": { "alert": {} } },
        { "Type": "EventGenerator", "Name": "alert",
          "Parameters": { "NewEventName": "RegistryAlert",
                          "Properties": { "Score": "#MACRO#Contexts[0]" } } }
      ]
    }
  ]
}"##;

#[test]
fn accumulated_registry_score_crosses_the_threshold() {
    let (engine, meta) = engine();
    engine.add_rules(REGISTRY_SCORING).unwrap();
    let alerts = capture(&engine, "RegistryAlert");

    let case1 = || {
        event(
            &meta,
            "RegistryWrite",
            &[("path", "path_1".into()), ("name", "name_1".into())],
        )
    };
    engine.process_event(case1());
    engine.process_event(case1());
    assert!(alerts.lock().is_empty(), "40 points stay under the threshold");

    engine.process_event(event(
        &meta,
        "RegistryWrite",
        &[("path", "path_2".into()), ("value", Value::Int(1))],
    ));

    let alerts = alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert_eq!(prop(&meta, &alerts[0], "Score"), Some(Value::Int(70)));
}

const FAILED_LOGON_SPEED: &str = r##"{
  "Rules": [
    {
      "RuleName": "FailedLogonSpeed",
      "SourceEvents": [
        { "EventName": "WindowsEvent",
          "ConnectTo": { "id_filter": { "SignalParameter": "#MACRO#Context.Event.EventId" } } }
      ],
      "Primitives": [
        { "Type": "IntegerFilter", "Name": "id_filter",
          "Parameters": { "Condition": "Equals", "CompareTo": 4625 },
          "ConnectTo": { "speed": { "SignalParameter": 1 } } },
        { "Type": "SpeedAlarm", "Name": "speed",
          "Parameters": { "MaximumSpeed": 3, "Period": 1 },
          "ConnectTo": { "alert": {} } },
        { "Type": "EventGenerator", "Name": "alert",
          "Parameters": { "NewEventName": "BruteForceAlert" } }
      ]
    }
  ]
}"##;

#[test]
fn slow_failed_logons_do_not_alarm_but_a_burst_does() {
    let (engine, meta) = engine();
    engine.add_rules(FAILED_LOGON_SPEED).unwrap();
    let alerts = capture(&engine, "BruteForceAlert");

    let failed_logon = || event(&meta, "WindowsEvent", &[("EventId", Value::Int(4625))]);

    // spaced out: entries age past the one-second window before the total
    // can stay above the maximum
    for _ in 0..5 {
        engine.process_event(failed_logon());
        std::thread::sleep(Duration::from_millis(600));
    }
    assert!(alerts.lock().is_empty(), "slow stream must not alarm");

    // burst: the fourth event within the window tips the total over 3
    for _ in 0..5 {
        engine.process_event(failed_logon());
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(alerts.lock().len(), 1);
}

const SHARED_COUNTER_CHECK: &str = r##"{
  "Rules": [
    {
      "RuleName": "TickThreshold",
      "SourceEvents": [
        { "EventName": "Tick",
          "ConnectTo": {
            "tick_counter": { "SignalParameter": 1 },
            "threshold_check": {}
          } }
      ],
      "Primitives": [
        { "Type": "BasicCounter", "Name": "tick_counter" },
        { "Type": "Checker", "Name": "threshold_check",
          "Parameters": { "CheckTarget": "tick_counter", "Condition": "GreaterThan",
                          "CompareTo": 2, "AutoRollOver": true },
          "ConnectTo": { "alert": {} } },
        { "Type": "EventGenerator", "Name": "alert",
          "Parameters": { "NewEventName": "TickAlert" } }
      ]
    }
  ]
}"##;

#[test]
fn checker_rollover_raises_the_barrier_without_resetting_the_counter() {
    let (engine, meta) = engine();
    engine.add_rules(SHARED_COUNTER_CHECK).unwrap();
    let alerts = capture(&engine, "TickAlert");

    // counter settles before the checker, so each Tick increments first,
    // then checks: values 1..=5 against barriers 2, then 4
    for _ in 0..5 {
        engine.process_event(event(&meta, "Tick", &[]));
    }
    // 3 > 2 fires and rolls the barrier to 4; 5 > 4 fires again
    assert_eq!(alerts.lock().len(), 2);
}
