mod lgp_source_test;
mod pipeline_test;
mod supervisor_test;
mod topology_test;
