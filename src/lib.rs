// PROCBENCH
// SCHEDULER AND MEMORY BEHAVIOR BENCHMARK FOR LINUX
//
// SPAWNS WAVES OF WORKLOAD PROCESSES, STOPS THEM AT A WALL-CLOCK DEADLINE,
// HARVESTS /proc/<pid> STATISTICS FROM THEIR OUTPUT AND AGGREGATES THE
// PARSED RECORDS INTO ONE JSON DOCUMENT PER INVOCATION.
//
// LIBRARY CRATE: EVERYTHING EXCEPT ARGUMENT PARSING AND LOGGER SETUP.
// THE BINARY (src/main.rs) IS BOTH THE DRIVER AND THE WORKLOAD.

pub mod deadline;
pub mod driver;
pub mod experiment;
pub mod parse;
pub mod runner;
pub mod store;
pub mod workload;
