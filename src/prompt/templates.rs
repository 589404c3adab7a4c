//! Built-in prompt templates

pub const AGENT_SYSTEM: &str = "agent_system";
pub const AGENT_TURN: &str = "agent_turn";
pub const JUDGE: &str = "judge";
pub const FEEDBACK: &str = "feedback";

pub const AGENT_SYSTEM_TEMPLATE: &str = r#"You are {{agent_id}}, acting as {{role}}.
{{#if profile}}
{{profile}}
{{/if}}

## Task
{{task}}
{{#if initial_progress}}

## Progress so far
{{initial_progress}}
{{/if}}

## How to act
{{instructions}}"#;

pub const AGENT_TURN_TEMPLATE: &str = r#"Turn {{turn}} of {{max_iterations}}. You may address: {{#if recipients}}{{recipients}}{{else}}nobody{{/if}}.
{{#if state}}

## Environment state
{{state}}
{{/if}}
{{#if memory}}

## Memory
{{#each memory}}
- {{this}}
{{/each}}
{{/if}}
{{#if history}}

## Conversation so far
{{#each history}}
{{this}}
{{/each}}
{{/if}}
{{#if feedback}}

## Evaluator feedback
{{feedback}}
{{/if}}
{{#if hint}}

## Your previous reply was rejected
{{hint}}
{{/if}}

Reply with your action now."#;

pub const JUDGE_TEMPLATE: &str = r#"You are evaluating a multi-agent {{environment}} run.

## Task
{{task}}

## Agents
{{#each agents}}{{#if @index}}, {{/if}}{{this}}{{/each}}

## Transcript
{{#each transcript}}
{{this}}
{{/each}}

## Final environment state
{{final_state}}

## Rubric
{{#if guidance}}
{{guidance}}
{{/if}}
Score each criterion from 1 (poor) to 5 (excellent):
{{#each criteria}}
- {{this}}
{{/each}}
Also score the team's planning and communication from 1 to 5, break the task
into milestones, and count the milestones each agent achieved.

Reply with one JSON object and nothing else:
{"scores": {"<criterion>": <1-5>}, "planning": <1-5>, "communication": <1-5>,
 "total_milestones": <int>, "milestones": {"<agent id>": <int>}, "summary": "<one paragraph>"}"#;

pub const FEEDBACK_TEMPLATE: &str = r#"You are coaching a team of agents working on a {{environment}} task.

## Task
{{task}}

## Turn {{turn}}
{{#each actions}}
{{this}}
{{/each}}

## Current environment state
{{final_state}}

Agents: {{#each agents}}{{this}}{{#unless @last}}, {{/unless}}{{/each}}

Give each agent one or two sentences of concrete advice for the next turn,
then one sentence for the whole team. Also score the team's planning and
communication so far from 1 to 5, break the task into milestones, and count
the milestones each agent has achieved so far.

Reply with one JSON object and nothing else:
{"agents": {"<agent id>": "<advice>"}, "team": "<advice>", "planning": <1-5>, "communication": <1-5>,
 "total_milestones": <int>, "milestones": {"<agent id>": <int>}}"#;
